use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::users;
use crate::modules::store::record::{RecordStore, StoreError};
use crate::modules::utils::time;

/// Persisted session-to-user back-reference. Expiry deliberately lives
/// on the owning user record, not here; verification re-derives validity
/// from the user record so the two files can drift without a stale
/// session ever passing.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SessionRecord {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
}

fn read_session(store: &RecordStore, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
    if session_id.is_empty() {
        return Ok(None);
    }
    store.read(&users::session_path(session_id))
}

/// Create a session for a user, rotating out any session already active.
/// Requires an existing user record with a username set. Returns whether
/// a session was created.
pub fn create(store: &RecordStore, user_id: &str) -> Result<bool, StoreError> {
    let user = match users::get_user(store, user_id)? {
        Some(user) => user,
        None => return Ok(false),
    };

    // Check if user exists
    if user.username.is_empty() {
        return Ok(false);
    }

    // If a session already exists, invalidate it
    if let Some(old_session) = user.session.as_deref() {
        remove(store, old_session)?;
    }

    // Open writable user record
    let mut user_file = match users::open_user(store, user_id, false)? {
        Some(handle) => handle,
        None => return Ok(false),
    };

    let session_id = Uuid::new_v4().to_string();
    user_file.value.session = Some(session_id.clone());
    user_file.value.session_expiry = Some(time::session_deadline());

    let mut session_file = match store.open::<SessionRecord>(&users::session_path(&session_id), true)? {
        Some(handle) => handle,
        None => {
            user_file.close();
            return Ok(false);
        }
    };

    session_file.value.session_id = session_id;
    session_file.value.user_id = user_id.to_string();

    session_file.save()?;
    user_file.save()?;

    Ok(true)
}

/// Check whether a session ID names a live session. Expired sessions are
/// deleted on sight.
pub fn verify(store: &RecordStore, session_id: &str) -> Result<bool, StoreError> {
    let session = match read_session(store, session_id)? {
        Some(session) => session,
        None => return Ok(false),
    };

    let user = match users::get_user(store, &session.user_id)? {
        Some(user) => user,
        None => return Ok(false),
    };

    let expiry = match user.session_expiry {
        Some(expiry) => expiry,
        None => return Ok(false),
    };

    if time::has_expired(expiry) {
        remove(store, session_id)?;
        return Ok(false);
    }

    Ok(true)
}

/// Return a verified live session ID for a user, creating one if none is
/// currently valid. Repeated calls inside the expiry window return the
/// same ID.
pub fn fetch(store: &RecordStore, user_id: &str) -> Result<Option<String>, StoreError> {
    let user = match users::get_user(store, user_id)? {
        Some(user) => user,
        None => return Ok(None),
    };

    if let Some(session_id) = user.session.as_deref() {
        if verify(store, session_id)? {
            return Ok(Some(session_id.to_string()));
        }
    }

    if !create(store, user_id)? {
        return Ok(None);
    }

    let refreshed = match users::get_user(store, user_id)? {
        Some(user) => user,
        None => return Ok(None),
    };

    Ok(refreshed.session)
}

/// Delete a session. Returns false, not an error, when there is nothing
/// to do: unknown session, or one the user record no longer points at
/// (already superseded by a newer session).
pub fn remove(store: &RecordStore, session_id: &str) -> Result<bool, StoreError> {
    let session = match read_session(store, session_id)? {
        Some(session) => session,
        None => return Ok(false),
    };

    if session.user_id.is_empty() {
        return Ok(false);
    }

    let user = match users::get_user(store, &session.user_id)? {
        Some(user) => user,
        None => return Ok(false),
    };

    if user.session.as_deref() != Some(session_id) {
        return Ok(false);
    }

    let mut user_file = match users::open_user(store, &session.user_id, false)? {
        Some(handle) => handle,
        None => return Ok(false),
    };

    user_file.value.session = None;
    user_file.value.session_expiry = None;
    user_file.save()?;

    store.remove(&users::session_path(session_id))?;

    Ok(true)
}

/// userID a session belongs to, without validating it
pub fn owner(store: &RecordStore, session_id: &str) -> Result<Option<String>, StoreError> {
    let session = read_session(store, session_id)?;
    Ok(session.map(|s| s.user_id).filter(|id| !id.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::auth::users::open_user;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, RecordStore) {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn seed_user(store: &RecordStore, user_id: &str, username: &str) {
        let mut handle = open_user(store, user_id, true).unwrap().unwrap();
        handle.value.user_id = user_id.to_string();
        handle.value.username = username.to_string();
        handle.value.password_hash = "salt$key".to_string();
        handle.save().unwrap();
    }

    fn expire_session(store: &RecordStore, user_id: &str) {
        let mut handle = open_user(store, user_id, false).unwrap().unwrap();
        handle.value.session_expiry = Some(time::now_millis() - 1000);
        handle.save().unwrap();
    }

    #[test]
    fn create_then_verify_round_trips() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1", "alice");

        assert!(create(&store, "user-1").unwrap());

        let session_id = users::get_user(&store, "user-1").unwrap().unwrap().session.unwrap();
        assert!(verify(&store, &session_id).unwrap());
        assert_eq!(owner(&store, &session_id).unwrap(), Some("user-1".to_string()));
    }

    #[test]
    fn create_requires_an_existing_named_user() {
        let (_tmp, store) = test_store();

        assert!(!create(&store, "missing").unwrap());

        seed_user(&store, "user-1", "");
        assert!(!create(&store, "user-1").unwrap());
    }

    #[test]
    fn create_rotates_an_active_session() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1", "alice");

        create(&store, "user-1").unwrap();
        let first = users::get_user(&store, "user-1").unwrap().unwrap().session.unwrap();

        create(&store, "user-1").unwrap();
        let second = users::get_user(&store, "user-1").unwrap().unwrap().session.unwrap();

        assert_ne!(first, second);
        // The superseded session record is gone
        assert!(!store.exists(&users::session_path(&first)));
        assert!(!verify(&store, &first).unwrap());
        assert!(verify(&store, &second).unwrap());
    }

    #[test]
    fn verify_rejects_unknown_and_empty_ids() {
        let (_tmp, store) = test_store();

        assert!(!verify(&store, "").unwrap());
        assert!(!verify(&store, "no-such-session").unwrap());
    }

    #[test]
    fn verify_deletes_expired_sessions() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1", "alice");

        create(&store, "user-1").unwrap();
        let session_id = users::get_user(&store, "user-1").unwrap().unwrap().session.unwrap();

        expire_session(&store, "user-1");

        assert!(!verify(&store, &session_id).unwrap());
        assert!(!store.exists(&users::session_path(&session_id)));

        // The expiry transition cleared the user's pointer fields
        let user = users::get_user(&store, "user-1").unwrap().unwrap();
        assert_eq!(user.session, None);
        assert_eq!(user.session_expiry, None);
    }

    #[test]
    fn fetch_is_idempotent_inside_the_expiry_window() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1", "alice");

        let first = fetch(&store, "user-1").unwrap().unwrap();
        let second = fetch(&store, "user-1").unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn fetch_replaces_an_expired_session() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1", "alice");

        let first = fetch(&store, "user-1").unwrap().unwrap();
        expire_session(&store, "user-1");

        let second = fetch(&store, "user-1").unwrap().unwrap();
        assert_ne!(first, second);
        assert!(verify(&store, &second).unwrap());
    }

    #[test]
    fn remove_is_a_no_op_for_unknown_or_superseded_sessions() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1", "alice");

        assert!(!remove(&store, "").unwrap());
        assert!(!remove(&store, "no-such-session").unwrap());

        create(&store, "user-1").unwrap();
        let session_id = users::get_user(&store, "user-1").unwrap().unwrap().session.unwrap();

        assert!(remove(&store, &session_id).unwrap());
        // A second delete finds nothing to do
        assert!(!remove(&store, &session_id).unwrap());
        assert!(!verify(&store, &session_id).unwrap());
    }
}

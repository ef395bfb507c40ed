use uuid::Uuid;

use super::users;
use crate::modules::store::index::IndexFile;
use crate::modules::store::record::{RecordStore, StoreError};
use crate::modules::utils::retry::{run_with_retry, WriteOutcome};
use crate::modules::utils::time;

/// Issue a fresh reset token for a user, invalidating any token issued
/// earlier. Touches the token index and the user record in one pass, so
/// a caller racing for either file sees `Busy` and retries.
pub fn issue(store: &RecordStore, user_id: &str) -> WriteOutcome {
    if user_id.is_empty() {
        return WriteOutcome::Failed;
    }

    let mut index_file = match IndexFile::otp(store).open() {
        Ok(Some(handle)) => handle,
        Ok(None) => return WriteOutcome::Busy,
        Err(e) => {
            log::error!("Failed to open reset token index: {}", e);
            return WriteOutcome::Failed;
        }
    };

    let mut user_file = match users::open_user(store, user_id, false) {
        Ok(Some(handle)) => handle,
        Ok(None) => {
            index_file.close();
            return WriteOutcome::Busy;
        }
        Err(e) => {
            log::error!("Failed to open user record {}: {}", user_id, e);
            return WriteOutcome::Failed;
        }
    };

    // A token can only be live for one user at a time; retire the old one
    if let Some(old_token) = user_file.value.otp.take() {
        index_file.value.remove(&old_token);
    }

    let token = Uuid::new_v4().to_string();
    user_file.value.otp = Some(token.clone());
    user_file.value.otp_expiry = Some(time::otp_deadline());
    index_file.value.insert(token, user_id.to_string());

    if let Err(e) = user_file.save() {
        log::error!("Failed to save user record {}: {}", user_id, e);
        return WriteOutcome::Failed;
    }
    if let Err(e) = index_file.save() {
        log::error!("Failed to save reset token index: {}", e);
        return WriteOutcome::Failed;
    }

    WriteOutcome::Done
}

/// Issue a token under the bounded-retry policy and hand it back
pub fn fetch(store: &RecordStore, user_id: &str) -> Result<Option<String>, StoreError> {
    if user_id.is_empty() {
        return Ok(None);
    }

    if !run_with_retry("issue reset token", || issue(store, user_id)) {
        return Ok(None);
    }

    let user = match users::get_user(store, user_id)? {
        Some(user) => user,
        None => return Ok(None),
    };

    Ok(user.otp)
}

/// Consume a reset token. The token is single-use: it is cleared from
/// the user record and the index whether or not it is still inside its
/// window. The owning userID comes back only for a live token.
pub fn consume(store: &RecordStore, token: &str) -> Result<Option<String>, StoreError> {
    if token.is_empty() {
        return Ok(None);
    }

    let user_id = match IndexFile::otp(store).get(token)? {
        Some(user_id) => user_id,
        None => return Ok(None),
    };

    let user = match users::get_user(store, &user_id)? {
        Some(user) => user,
        None => return Ok(None),
    };

    let expiry = match user.otp_expiry {
        Some(expiry) => expiry,
        None => return Ok(None),
    };
    let expired = time::has_expired(expiry);

    let mut user_file = match users::open_user(store, &user_id, false)? {
        Some(handle) => handle,
        None => return Ok(None),
    };

    user_file.value.otp = None;
    user_file.value.otp_expiry = None;
    user_file.save()?;

    if IndexFile::otp(store).set(token, None) != WriteOutcome::Done {
        log::warn!("Reset token index entry was left behind for a consumed token");
    }

    if expired {
        Ok(None)
    } else {
        Ok(Some(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::auth::users::open_user;
    use crate::OTP_INDEX_FILE;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, RecordStore) {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn seed_user(store: &RecordStore, user_id: &str) {
        let mut handle = open_user(store, user_id, true).unwrap().unwrap();
        handle.value.user_id = user_id.to_string();
        handle.value.username = "alice".to_string();
        handle.value.password_hash = "salt$key".to_string();
        handle.save().unwrap();
    }

    fn expire_otp(store: &RecordStore, user_id: &str) {
        let mut handle = open_user(store, user_id, false).unwrap().unwrap();
        handle.value.otp_expiry = Some(time::now_millis() - 1000);
        handle.save().unwrap();
    }

    #[test]
    fn fetch_issues_a_token_and_indexes_it() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1");

        let token = fetch(&store, "user-1").unwrap().unwrap();

        assert_eq!(
            IndexFile::otp(&store).get(&token).unwrap(),
            Some("user-1".to_string())
        );
        let user = users::get_user(&store, "user-1").unwrap().unwrap();
        assert_eq!(user.otp, Some(token));
        assert!(user.otp_expiry.is_some());
    }

    #[test]
    fn consume_returns_the_owner_once() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1");

        let token = fetch(&store, "user-1").unwrap().unwrap();

        assert_eq!(consume(&store, &token).unwrap(), Some("user-1".to_string()));

        // Single use: the second consume finds nothing
        assert_eq!(consume(&store, &token).unwrap(), None);

        let user = users::get_user(&store, "user-1").unwrap().unwrap();
        assert_eq!(user.otp, None);
        assert_eq!(user.otp_expiry, None);
    }

    #[test]
    fn reissuing_invalidates_the_previous_token() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1");

        let first = fetch(&store, "user-1").unwrap().unwrap();
        let second = fetch(&store, "user-1").unwrap().unwrap();
        assert_ne!(first, second);

        assert_eq!(consume(&store, &first).unwrap(), None);
        assert_eq!(consume(&store, &second).unwrap(), Some("user-1".to_string()));
    }

    #[test]
    fn expired_tokens_are_consumed_but_yield_no_owner() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1");

        let token = fetch(&store, "user-1").unwrap().unwrap();
        expire_otp(&store, "user-1");

        assert_eq!(consume(&store, &token).unwrap(), None);

        // Cleared everywhere despite being expired
        let user = users::get_user(&store, "user-1").unwrap().unwrap();
        assert_eq!(user.otp, None);
        assert_eq!(IndexFile::otp(&store).get(&token).unwrap(), None);
    }

    #[test]
    fn consume_without_an_expiry_leaves_the_record_untouched() {
        let (_tmp, store) = test_store();
        seed_user(&store, "user-1");

        let token = fetch(&store, "user-1").unwrap().unwrap();

        // Drop the expiry field as a crashed writer would
        let mut handle = open_user(&store, "user-1", false).unwrap().unwrap();
        handle.value.otp_expiry = None;
        handle.save().unwrap();

        assert_eq!(consume(&store, &token).unwrap(), None);

        // The token itself was not cleared
        let user = users::get_user(&store, "user-1").unwrap().unwrap();
        assert_eq!(user.otp, Some(token));
    }

    #[test]
    fn consume_ignores_unknown_tokens() {
        let (_tmp, store) = test_store();

        assert_eq!(consume(&store, "").unwrap(), None);
        assert_eq!(consume(&store, "no-such-token").unwrap(), None);

        // And the index file was not created as a side effect of reading
        let raw: Option<HashMap<String, String>> = store.read(OTP_INDEX_FILE).unwrap();
        assert!(raw.is_none());
    }
}

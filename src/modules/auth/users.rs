use serde::{Deserialize, Serialize};

use crate::modules::store::index::IndexFile;
use crate::modules::store::record::{RecordHandle, RecordStore, StoreError};

/// Persisted per-user profile and credential document. Optional fields
/// are absent from the JSON until set; the session and reset-token
/// pointers are cleared by writing `None` and re-saving.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UserRecord {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_expiry: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_expiry: Option<u64>,
}

/// Path of a user record under the store root
pub fn user_path(user_id: &str) -> String {
    format!("users/{}.json", user_id)
}

/// Path of a session record under the store root
pub fn session_path(session_id: &str) -> String {
    format!("sessions/{}.json", session_id)
}

/// One-shot read of a user record
pub fn get_user(store: &RecordStore, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
    if user_id.is_empty() {
        return Ok(None);
    }
    store.read(&user_path(user_id))
}

/// Open a user record for mutation. Mutation always goes through a
/// writable handle: open, change fields, save.
pub fn open_user<'a>(
    store: &'a RecordStore,
    user_id: &str,
    create: bool,
) -> Result<Option<RecordHandle<'a, UserRecord>>, StoreError> {
    if user_id.is_empty() {
        return Ok(None);
    }
    store.open(&user_path(user_id), create)
}

/// Resolve a username to a userID through the username index
pub fn user_id_by_username(store: &RecordStore, username: &str) -> Result<Option<String>, StoreError> {
    IndexFile::username(store).get(username)
}

/// Resolve an email address to a userID through the email index
pub fn user_id_by_email(store: &RecordStore, email: &str) -> Result<Option<String>, StoreError> {
    IndexFile::email(store).get(email)
}

/// Username stored on a user record
pub fn username_of(store: &RecordStore, user_id: &str) -> Result<Option<String>, StoreError> {
    let user = get_user(store, user_id)?;
    Ok(user.map(|u| u.username).filter(|name| !name.is_empty()))
}

/// Email address stored on a user record
pub fn email_of(store: &RecordStore, user_id: &str) -> Result<Option<String>, StoreError> {
    Ok(get_user(store, user_id)?.and_then(|u| u.email))
}

/// Display name stored on a user record
pub fn display_name_of(store: &RecordStore, user_id: &str) -> Result<Option<String>, StoreError> {
    Ok(get_user(store, user_id)?.and_then(|u| u.display_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, RecordStore) {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn write_user(store: &RecordStore, user_id: &str, username: &str) {
        let mut handle = open_user(store, user_id, true).unwrap().unwrap();
        handle.value.user_id = user_id.to_string();
        handle.value.username = username.to_string();
        handle.value.password_hash = "salt$key".to_string();
        handle.save().unwrap();
    }

    #[test]
    fn optional_fields_stay_absent_in_the_json() {
        let (_tmp, store) = test_store();
        write_user(&store, "user-1", "alice");

        let raw = std::fs::read_to_string(store.root().join("users/user-1.json")).unwrap();
        assert!(raw.contains("\"username\""));
        assert!(!raw.contains("session"));
        assert!(!raw.contains("otp"));
        assert!(!raw.contains("email"));
    }

    #[test]
    fn get_user_returns_absent_for_unknown_or_empty_ids() {
        let (_tmp, store) = test_store();

        assert_eq!(get_user(&store, "missing").unwrap(), None);
        assert_eq!(get_user(&store, "").unwrap(), None);
    }

    #[test]
    fn mutation_round_trips_through_a_handle() {
        let (_tmp, store) = test_store();
        write_user(&store, "user-1", "alice");

        let mut handle = open_user(&store, "user-1", false).unwrap().unwrap();
        handle.value.display_name = Some("Alice".to_string());
        handle.save().unwrap();

        assert_eq!(
            display_name_of(&store, "user-1").unwrap(),
            Some("Alice".to_string())
        );
        assert_eq!(username_of(&store, "user-1").unwrap(), Some("alice".to_string()));
        assert_eq!(email_of(&store, "user-1").unwrap(), None);
    }

    #[test]
    fn username_of_treats_blank_usernames_as_absent() {
        let (_tmp, store) = test_store();
        write_user(&store, "user-1", "");

        assert_eq!(username_of(&store, "user-1").unwrap(), None);
    }

    #[test]
    fn index_lookups_delegate_to_the_index_files() {
        let (_tmp, store) = test_store();

        IndexFile::username(&store).set("alice", Some("user-1"));
        IndexFile::email(&store).set("alice@example.com", Some("user-1"));

        assert_eq!(
            user_id_by_username(&store, "alice").unwrap(),
            Some("user-1".to_string())
        );
        assert_eq!(
            user_id_by_email(&store, "alice@example.com").unwrap(),
            Some("user-1".to_string())
        );
        assert_eq!(user_id_by_username(&store, "bob").unwrap(), None);
    }
}

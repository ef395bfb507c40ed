use std::collections::HashMap;

use super::record::{RecordHandle, RecordStore, StoreError};
use crate::modules::utils::retry::WriteOutcome;
use crate::{EMAIL_INDEX_FILE, OTP_INDEX_FILE, USERNAME_INDEX_FILE};

/// A persisted key-to-userID lookup table. The whole map is loaded into
/// memory on each access; there are no partial reads. Concurrent writers
/// race on the backing file and are only mitigated by the bounded-retry
/// wrapper around `set`, never by a transactional merge.
pub struct IndexFile<'a> {
    store: &'a RecordStore,
    path: &'static str,
}

impl<'a> IndexFile<'a> {
    /// The username-to-userID index
    pub fn username(store: &'a RecordStore) -> Self {
        Self {
            store,
            path: USERNAME_INDEX_FILE,
        }
    }

    /// The email-to-userID index
    pub fn email(store: &'a RecordStore) -> Self {
        Self {
            store,
            path: EMAIL_INDEX_FILE,
        }
    }

    /// The reset-token-to-userID index
    pub fn otp(store: &'a RecordStore) -> Self {
        Self {
            store,
            path: OTP_INDEX_FILE,
        }
    }

    /// Relative path of the backing file.
    pub fn path(&self) -> &'static str {
        self.path
    }

    /// Look up the userID mapped to a key. Missing file and missing key
    /// both yield `Ok(None)`.
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if key.is_empty() {
            return Ok(None);
        }
        let map: Option<HashMap<String, String>> = self.store.read(self.path)?;
        Ok(map.and_then(|m| m.get(key).cloned()))
    }

    /// Open the backing file for a multi-key edit in a single save.
    /// `Ok(None)` means another caller holds the file.
    pub fn open(&self) -> Result<Option<RecordHandle<'a, HashMap<String, String>>>, StoreError> {
        self.store.open(self.path, true)
    }

    /// Map a key to a userID, or remove the mapping when `value` is
    /// `None`. `Busy` is returned when the backing file is held by
    /// another caller and the write should be retried.
    pub fn set(&self, key: &str, value: Option<&str>) -> WriteOutcome {
        if key.is_empty() {
            return WriteOutcome::Failed;
        }

        let mut handle = match self.open() {
            Ok(Some(handle)) => handle,
            Ok(None) => return WriteOutcome::Busy,
            Err(e) => {
                log::error!("Failed to open index {}: {}", self.path, e);
                return WriteOutcome::Failed;
            }
        };

        match value {
            Some(user_id) => {
                handle.value.insert(key.to_string(), user_id.to_string());
            }
            None => {
                handle.value.remove(key);
            }
        }

        match handle.save() {
            Ok(()) => WriteOutcome::Done,
            Err(e) => {
                log::error!("Failed to save index {}: {}", self.path, e);
                WriteOutcome::Failed
            }
        }
    }
}

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Custom error type for record store operations
#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Malformed(serde_json::Error),
}

// Implement conversion from io::Error to StoreError
impl From<io::Error> for StoreError {
    fn from(error: io::Error) -> Self {
        StoreError::Io(error)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Malformed(error)
    }
}

// Implementation of Display trait for StoreError
impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Malformed(e) => write!(f, "Malformed record: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// A store of JSON records, one file per record, rooted at a data
/// directory. A record is held open for writing by at most one caller at
/// a time; the open-path set is a cooperative in-process guard, not a
/// cross-process lock. The second opener is not queued, it fails
/// immediately and has to retry.
pub struct RecordStore {
    root: PathBuf,
    open_paths: Mutex<HashSet<PathBuf>>,
}

/// A writable handle to a single record. Holding the handle holds the
/// guard for its path; `save` writes the value back and releases,
/// `close` releases without writing, and dropping an unsaved handle
/// releases as well.
pub struct RecordHandle<'a, T> {
    store: &'a RecordStore,
    path: PathBuf,
    pub value: T,
    released: bool,
}

impl RecordStore {
    /// Create a store rooted at the given directory, creating it if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            open_paths: Mutex::new(HashSet::new()),
        })
    }

    /// Root directory this store persists under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn acquire(&self, path: &Path) -> bool {
        let mut open_paths = self.open_paths.lock();
        if open_paths.contains(path) {
            return false;
        }
        open_paths.insert(path.to_path_buf());
        true
    }

    fn release(&self, path: &Path) {
        self.open_paths.lock().remove(path);
    }

    fn is_held(&self, path: &Path) -> bool {
        self.open_paths.lock().contains(path)
    }

    /// Check whether a record file exists.
    pub fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }

    /// Open a record for writing. Returns `Ok(None)` when the path is
    /// already held open by another caller, or when `create` is false and
    /// the file does not exist. A missing file opened with `create` is
    /// initialized with the default value and persisted immediately.
    pub fn open<T>(&self, name: &str, create: bool) -> Result<Option<RecordHandle<'_, T>>, StoreError>
    where
        T: Default + Serialize + DeserializeOwned,
    {
        let path = self.resolve(name);
        if !create && !path.is_file() {
            return Ok(None);
        }
        if !self.acquire(&path) {
            return Ok(None);
        }
        match self.load_or_init::<T>(&path) {
            Ok(value) => Ok(Some(RecordHandle {
                store: self,
                path,
                value,
                released: false,
            })),
            Err(e) => {
                self.release(&path);
                Err(e)
            }
        }
    }

    fn load_or_init<T>(&self, path: &Path) -> Result<T, StoreError>
    where
        T: Default + Serialize + DeserializeOwned,
    {
        if path.is_file() {
            let data = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let value = T::default();
            fs::write(path, serde_json::to_string_pretty(&value)?)?;
            Ok(value)
        }
    }

    /// One-shot read of a record. Never takes the guard; a missing file
    /// yields `Ok(None)`, not an error.
    pub fn read<T>(&self, name: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned,
    {
        let path = self.resolve(name);
        if !path.is_file() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Remove a record file. Returns `Ok(false)` when the record is held
    /// open or does not exist.
    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.resolve(name);
        if self.is_held(&path) {
            return Ok(false);
        }
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    /// List the record names (file stems) under a subdirectory of the
    /// store. A missing subdirectory yields an empty list.
    pub fn list(&self, dir: &str) -> Result<Vec<String>, StoreError> {
        let path = self.resolve(dir);
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&path)? {
            let entry_path = entry?.path();
            if entry_path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = entry_path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        Ok(names)
    }
}

impl<'a, T: Serialize> RecordHandle<'a, T> {
    /// Serialize the value back to storage and release the guard.
    pub fn save(mut self) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(&self.value)?;
        fs::write(&self.path, data)?;
        self.release_guard();
        Ok(())
    }
}

impl<'a, T> RecordHandle<'a, T> {
    /// Release the guard without writing anything back.
    pub fn close(mut self) {
        self.release_guard();
    }

    fn release_guard(&mut self) {
        if !self.released {
            self.store.release(&self.path);
            self.released = true;
        }
    }
}

impl<'a, T> Drop for RecordHandle<'a, T> {
    fn drop(&mut self) {
        self.release_guard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
    struct Counter {
        count: u32,
    }

    fn test_store() -> (TempDir, RecordStore) {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::new(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn open_with_create_initializes_and_persists_default() {
        let (_tmp, store) = test_store();

        let handle = store.open::<Counter>("nested/count.json", true).unwrap().unwrap();
        assert_eq!(handle.value, Counter::default());
        handle.close();

        // The default value hit disk before the handle was released
        assert!(store.exists("nested/count.json"));
        let read: Option<Counter> = store.read("nested/count.json").unwrap();
        assert_eq!(read, Some(Counter::default()));
    }

    #[test]
    fn open_without_create_returns_none_for_missing_file() {
        let (_tmp, store) = test_store();

        let handle = store.open::<Counter>("missing.json", false).unwrap();
        assert!(handle.is_none());
        assert!(!store.exists("missing.json"));
    }

    #[test]
    fn second_open_fails_while_handle_is_held() {
        let (_tmp, store) = test_store();

        let first = store.open::<Counter>("count.json", true).unwrap();
        assert!(first.is_some());

        let second = store.open::<Counter>("count.json", true).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn save_releases_the_guard() {
        let (_tmp, store) = test_store();

        let mut handle = store.open::<Counter>("count.json", true).unwrap().unwrap();
        handle.value.count = 3;
        handle.save().unwrap();

        let reopened = store.open::<Counter>("count.json", true).unwrap().unwrap();
        assert_eq!(reopened.value.count, 3);
    }

    #[test]
    fn dropping_an_unsaved_handle_releases_the_guard() {
        let (_tmp, store) = test_store();

        {
            let mut handle = store.open::<Counter>("count.json", true).unwrap().unwrap();
            handle.value.count = 9;
            // Dropped without save
        }

        let read: Option<Counter> = store.read("count.json").unwrap();
        assert_eq!(read, Some(Counter::default()));

        // And the path can be opened again
        assert!(store.open::<Counter>("count.json", true).unwrap().is_some());
    }

    #[test]
    fn read_missing_file_yields_none() {
        let (_tmp, store) = test_store();

        let read: Option<HashMap<String, String>> = store.read("nothing.json").unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn remove_is_a_no_op_for_missing_or_held_records() {
        let (_tmp, store) = test_store();

        assert!(!store.remove("missing.json").unwrap());

        let handle = store.open::<Counter>("count.json", true).unwrap().unwrap();
        assert!(!store.remove("count.json").unwrap());
        handle.close();

        assert!(store.remove("count.json").unwrap());
        assert!(!store.exists("count.json"));
    }

    #[test]
    fn list_returns_record_stems() {
        let (_tmp, store) = test_store();

        store.open::<Counter>("items/a.json", true).unwrap().unwrap().close();
        store.open::<Counter>("items/b.json", true).unwrap().unwrap().close();

        let mut names = store.list("items").unwrap();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        assert!(store.list("empty").unwrap().is_empty());
    }
}

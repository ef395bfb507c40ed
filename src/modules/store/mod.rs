pub mod index;
pub mod record;

// Re-export the main types and functions
pub use index::IndexFile;
pub use record::{RecordHandle, RecordStore, StoreError};

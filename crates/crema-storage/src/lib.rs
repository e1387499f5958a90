//! Session persistence for the Crema client.
//!
//! This crate provides:
//! - **SecureStorage**: a small synchronous key/value trait
//! - **FileStorage**: one file per key under a namespace directory
//! - **MemoryStorage**: an in-process map
//! - **SessionStore**: the self-healing session record store

mod file;
mod keys;
mod memory;
mod record;
mod session_store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use record::{SessionRecord, TokenBundle};
pub use session_store::SessionStore;
pub use traits::SecureStorage;

use crema_exceptions::AppException;
use std::path::Path;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific failure
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Key contains characters the backend cannot store
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppException {
    fn from(err: StorageError) -> Self {
        AppException::storage("Could not save your session on this device")
            .with_detail(err.to_string())
    }
}

/// Open the file-backed storage for `namespace` under `root`.
pub fn open_file_storage(root: &Path, namespace: &str) -> StorageResult<Box<dyn SecureStorage>> {
    let storage = FileStorage::new(root.join(namespace))?;
    Ok(Box::new(storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crema_exceptions::ExceptionKind;

    #[test]
    fn test_storage_error_converts_to_storage_kind() {
        let err = StorageError::Backend("disk full".to_string());
        let exception: AppException = err.into();

        assert_eq!(exception.kind(), &ExceptionKind::Storage);
        assert_eq!(exception.detail(), Some("Storage backend error: disk full"));
    }

    #[test]
    fn test_storage_keys_are_distinct() {
        assert!(!StorageKeys::SESSION_RECORD.is_empty());
        assert!(!StorageKeys::ACCESS_TOKEN.is_empty());
        assert_ne!(StorageKeys::SESSION_RECORD, StorageKeys::ACCESS_TOKEN);
    }

    #[test]
    fn test_open_file_storage_uses_namespace_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_file_storage(dir.path(), "com.crema.client").unwrap();

        storage.set(StorageKeys::ACCESS_TOKEN, "abc").unwrap();
        assert!(dir
            .path()
            .join("com.crema.client")
            .join(StorageKeys::ACCESS_TOKEN)
            .exists());
    }
}

//! Cache Error Types
//!
//! Structured error handling for the cache tiers.
//! Platform I/O errors are converted here so nothing raw escapes the engine.

use std::io;

/// Cache error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Persistent storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Directory I/O error: {0}")]
    DirectoryIo(String),

    #[error("Permission revoked for {0}")]
    PermissionRevoked(String),

    #[error("Local folders are not supported on this platform")]
    Unsupported,

    #[error("Invalid folder selection: {0}")]
    InvalidSelection(String),
}

impl CacheError {
    /// Map a directory-tier I/O error, keeping permission failures distinct
    pub fn from_directory_io(context: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => CacheError::PermissionRevoked(context.to_string()),
            _ => CacheError::DirectoryIo(format!("{}: {}", context, err)),
        }
    }

    /// Map a store I/O error raised after the store was opened
    pub fn from_store_io(context: &str, err: io::Error) -> Self {
        CacheError::Storage(format!("{}: {}", context, err))
    }

    /// Whether the caller can recover by falling back to another tier
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::DirectoryIo(_) | CacheError::PermissionRevoked(_)
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Storage(format!("Serialization failed: {}", err))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

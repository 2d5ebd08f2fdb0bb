//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("upload session already exists: {0}")]
    SessionExists(String),

    #[error("unknown upload session: {0}")]
    UnknownUpload(String),

    #[error("incomplete upload: missing {} chunks", missing.len())]
    IncompleteUpload { missing: Vec<u32> },

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Core(#[from] driftsync_core::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

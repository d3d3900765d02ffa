//! Storage error types.

use thiserror::Error;
use trove_core::TagError;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("not a manifest: {0}")]
    NotAManifest(String),

    #[error("postage batch {0} is exhausted")]
    QuotaExceeded(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("tag accounting failed: {0}")]
    Tag(#[from] TagError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] trove_core::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid feed: {0}")]
    InvalidFeed(String),

    #[error("malformed feed update: {0}")]
    MalformedFeedUpdate(String),

    #[error("invalid batch id: {0}")]
    InvalidBatchId(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for cache operations.

use std::io;
use thiserror::Error;

/// Result type for cache operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while loading or saving a cache.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The cache document exists but is not a JSON object of strings.
    #[error("cache corrupted: {0}")]
    Corrupted(String),

    /// The cache contents could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cache refuses writes.
    #[error("cache is read-only")]
    ReadOnly,
}

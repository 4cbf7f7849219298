//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding live query frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a well-formed message.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame names an operation this client does not know.
    #[error("unknown op: {0}")]
    UnknownOp(String),

    /// A required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates a malformed frame error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

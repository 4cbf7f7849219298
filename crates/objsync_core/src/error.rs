//! Error types for objsync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Two field operations were merged with no rule for that pairing.
    ///
    /// This is a programming error in the caller, not a runtime condition.
    #[error("operation {next} is invalid after previous operation {previous}")]
    InvalidOperationSequence {
        /// Kind of the already pending operation.
        previous: &'static str,
        /// Kind of the operation being merged on top.
        next: &'static str,
    },

    /// An operation met an existing value of an incompatible type.
    #[error("type mismatch on field '{key}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Field name.
        key: String,
        /// What the operation needed.
        expected: &'static str,
        /// What was actually there.
        found: &'static str,
    },

    /// Field names must be non-empty.
    #[error("invalid field name: {key:?}")]
    InvalidKey {
        /// The rejected field name.
        key: String,
    },

    /// A wire-encoded field operation could not be decoded.
    #[error("invalid wire operation: {message}")]
    InvalidWireOperation {
        /// Description of the problem.
        message: String,
    },

    /// Integer addition overflowed or produced a non-finite number.
    #[error("numeric overflow on field '{key}'")]
    NumericOverflow {
        /// Field name.
        key: String,
    },

    /// Value could not be converted to or from JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persistent cache error.
    #[error("cache error: {0}")]
    Cache(#[from] objsync_storage::StorageError),
}

impl CoreError {
    /// Creates an invalid wire operation error.
    pub fn invalid_wire(message: impl Into<String>) -> Self {
        Self::InvalidWireOperation {
            message: message.into(),
        }
    }

    /// Attaches a field name to errors raised without one.
    pub fn with_key(self, field: &str) -> Self {
        match self {
            CoreError::TypeMismatch {
                key,
                expected,
                found,
            } if key.is_empty() => CoreError::TypeMismatch {
                key: field.to_string(),
                expected,
                found,
            },
            CoreError::NumericOverflow { key } if key.is_empty() => CoreError::NumericOverflow {
                key: field.to_string(),
            },
            other => other,
        }
    }

    /// Returns true if this is a persistent cache I/O failure.
    pub fn is_cache_error(&self) -> bool {
        matches!(self, CoreError::Cache(_))
    }
}

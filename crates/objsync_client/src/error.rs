//! Error types for the client.

use objsync_protocol::RequestId;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Live query error code: an event could not be handled locally.
pub const EVENT_HANDLING_FAILED: i64 = 300;

/// Live query error code: no live query server URL is configured.
pub const SERVER_URL_MISSING: i64 = 301;

/// Errors that can occur in client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] objsync_protocol::ProtocolError),

    /// The server refused the session.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server rejected a subscribe or unsubscribe request.
    #[error("subscription error {code}: {message}")]
    Subscription {
        /// Server error code.
        code: i64,
        /// Server message.
        message: String,
    },

    /// The server rejected a REST request.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code (or HTTP status when the body carries none).
        code: i64,
        /// Server message.
        message: String,
    },

    /// Local object or cache error.
    #[error("core error: {0}")]
    Core(#[from] objsync_core::CoreError),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// The requested action is not valid in the current state.
    #[error("invalid state transition from {from} on {action}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted action.
        action: String,
    },

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The connection closed while a request was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// No decoder is registered for a class.
    #[error("no type registered for class {0}")]
    UnregisteredType(String),

    /// A class is registered with a different Rust type.
    #[error("class {class_name} is registered as {registered}, not {requested}")]
    TypeMismatch {
        /// Class name.
        class_name: String,
        /// Type registered for the class.
        registered: &'static str,
        /// Type requested by the caller.
        requested: &'static str,
    },

    /// Configuration is incomplete or invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request id is already routed on this connection.
    #[error("request id {0} is already in use")]
    DuplicateRequestId(RequestId),
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// The client never retries on its own; this only classifies.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::Timeout | ClientError::ConnectionClosed => true,
            ClientError::Server { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Returns the live query error code reported to `on_error` for this error.
    pub fn event_code(&self) -> i64 {
        match self {
            ClientError::Subscription { code, .. } | ClientError::Server { code, .. } => *code,
            ClientError::InvalidConfig(_) => SERVER_URL_MISSING,
            _ => EVENT_HANDLING_FAILED,
        }
    }
}

//! Error hierarchy for ensemble sessions and namespace operations.
//!
//! Failures are categorized by where they originate: the namespace operation
//! itself, the logical session, or local configuration. Network faults are
//! deliberately not a category of their own: the connection supervisor folds
//! them into [`Error::ConnectionClosed`] and retries the *connection*, never
//! the request. Callers re-issue operations themselves where idempotency
//! allows.

use config::ConfigError;

use crate::proto::ErrorCode;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Target node does not exist.
    #[error("node not found")]
    NodeNotFound,

    /// Create collided with an existing node.
    #[error("node already exists")]
    NodeExists,

    /// Expected version did not match the node's current version.
    #[error("version conflict")]
    BadVersion,

    /// The connection the request was riding on was torn down, or the client
    /// has been closed. Pending requests are drained with this error on every
    /// disconnect and on explicit close.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server refused to resume the session. Fatal to the logical
    /// session: a fresh one is negotiated by the supervisor, but requests and
    /// watches belonging to the expired session resolve with this error.
    #[error("session expired")]
    SessionExpired,

    /// The server rejected the client's credentials.
    #[error("authentication failed")]
    AuthFailed,

    /// Caller-supplied deadline elapsed before a response arrived. The request
    /// itself stays tracked until the connection resolves it.
    #[error("operation timed out")]
    Timeout,

    /// Local configuration failures (file parsing, invalid overrides).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Frame- or record-level protocol violation. Surfaced to data callers
    /// only as `ConnectionClosed`; kept distinct for supervisor diagnostics.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Server-reported error code with no dedicated variant.
    #[error("server error: {0:?}")]
    Server(ErrorCode),
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NoNode => Error::NodeNotFound,
            ErrorCode::NodeExists => Error::NodeExists,
            ErrorCode::BadVersion => Error::BadVersion,
            ErrorCode::SessionExpired => Error::SessionExpired,
            ErrorCode::AuthFailed | ErrorCode::NoAuth => Error::AuthFailed,
            ErrorCode::ConnectionLoss => Error::ConnectionClosed,
            ErrorCode::OperationTimeout => Error::Timeout,
            other => Error::Server(other),
        }
    }
}

impl Error {
    /// Whether re-issuing the failed operation on a healthy session can
    /// succeed. Node-level outcomes are definitive; session-level ones are
    /// not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConnectionClosed | Error::Timeout)
    }
}

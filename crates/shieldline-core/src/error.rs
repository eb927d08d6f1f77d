//! Shared error type across shieldline crates.

use thiserror::Error;

/// Reply-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed request.
    BadRequest,
    /// Sender is not trusted for this request.
    NotAllowed,
    /// Rule engine cardinality limit exceeded.
    LimitExceeded,
    /// Persistent storage failure.
    Storage,
    /// Host call failure.
    Host,
    /// Startup sequence failure.
    Boot,
    /// Unsupported schema version.
    UnsupportedVersion,
    /// Internal error.
    Internal,
}

impl ClientCode {
    /// String representation used in JSON replies.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::NotAllowed => "NOT_ALLOWED",
            ClientCode::LimitExceeded => "LIMIT_EXCEEDED",
            ClientCode::Storage => "STORAGE",
            ClientCode::Host => "HOST",
            ClientCode::Boot => "BOOT",
            ClientCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ShieldError>;

/// Unified error type used by core and agent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShieldError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not allowed: {0}")]
    NotAllowed(String),
    #[error("too many rule sets: {requested} requested, engine allows {max}")]
    LimitExceeded { requested: usize, max: usize },
    #[error("storage: {0}")]
    Storage(String),
    #[error("host: {0}")]
    Host(String),
    #[error("boot: {0}")]
    Boot(String),
    #[error("unsupported schema version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl ShieldError {
    /// Map internal error to a stable reply code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            ShieldError::BadRequest(_) => ClientCode::BadRequest,
            ShieldError::NotAllowed(_) => ClientCode::NotAllowed,
            ShieldError::LimitExceeded { .. } => ClientCode::LimitExceeded,
            ShieldError::Storage(_) => ClientCode::Storage,
            ShieldError::Host(_) => ClientCode::Host,
            ShieldError::Boot(_) => ClientCode::Boot,
            ShieldError::UnsupportedVersion => ClientCode::UnsupportedVersion,
            ShieldError::Internal(_) => ClientCode::Internal,
        }
    }
}

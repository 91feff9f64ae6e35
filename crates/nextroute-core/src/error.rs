//! Shared error type across nextroute crates.

use thiserror::Error;

/// Stable error codes (used by logs, metrics labels and test vectors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Truncated or structurally invalid bytes.
    Malformed,
    /// A versioned record carried a version outside the supported range.
    UnsupportedVersion,
    /// A bounded field was outside its declared range.
    OutOfRange,
    /// Invalid configuration or caller input.
    BadRequest,
    /// Signature, key or token failure.
    Crypto,
    /// Internal server error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and vectors.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Malformed => "MALFORMED",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::OutOfRange => "OUT_OF_RANGE",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Crypto => "CRYPTO",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, NextRouteError>;

/// Unified error type used by core and backend.
#[derive(Debug, Error)]
pub enum NextRouteError {
    #[error("malformed: {0}")]
    Malformed(String),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("out of range: {0}")]
    OutOfRange(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("crypto: {0}")]
    Crypto(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl NextRouteError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            NextRouteError::Malformed(_) => ErrorCode::Malformed,
            NextRouteError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            NextRouteError::OutOfRange(_) => ErrorCode::OutOfRange,
            NextRouteError::BadRequest(_) => ErrorCode::BadRequest,
            NextRouteError::Crypto(_) => ErrorCode::Crypto,
            NextRouteError::Internal(_) => ErrorCode::Internal,
        }
    }
}

//! Data Flow Error Types
//!
//! Protocol-level failures travel as [`StatusFailure`] values carrying a
//! [`FailureKind`]. Storage and internal faults are separate variants of
//! [`SignalingError`] so the transport layer can tell them apart.

use std::fmt;

use thiserror::Error;

/// Failure taxonomy shared by hooks, the store and the signaling service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Unknown flow id. Not retried internally.
    NotFound,
    /// Lease held elsewhere or flow in an incompatible state. Retry with backoff.
    Conflict,
    /// Malformed or disallowed message. Not retried.
    BadRequest,
    /// Principal does not own the resource.
    Unauthorized,
    /// Hook reported an unrecoverable error. Flow is moved to FAILED.
    Fatal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "NOT_FOUND",
            FailureKind::Conflict => "CONFLICT",
            FailureKind::BadRequest => "BAD_REQUEST",
            FailureKind::Unauthorized => "UNAUTHORIZED",
            FailureKind::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure half of a [`StatusResult`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {reason}")]
pub struct StatusFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl StatusFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, reason)
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Conflict, reason)
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::BadRequest, reason)
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Unauthorized, reason)
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Fatal, reason)
    }
}

/// Either a payload or a failure, never both.
pub type StatusResult<T> = Result<T, StatusFailure>;

/// Signaling error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalingError {
    /// Expected protocol outcome (not found, conflict, validation, ...)
    #[error(transparent)]
    Failure(#[from] StatusFailure),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl SignalingError {
    pub fn not_found(id: &str) -> Self {
        StatusFailure::not_found(format!("Data flow not found: {}", id)).into()
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        StatusFailure::conflict(reason).into()
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        StatusFailure::bad_request(reason).into()
    }

    /// Failure kind when this is a protocol-level failure
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            SignalingError::Failure(f) => Some(f.kind),
            _ => None,
        }
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            SignalingError::Failure(f) => f.kind.as_str(),
            SignalingError::DatabaseError(_) => "DATABASE_ERROR",
            SignalingError::InvalidRecord(_) => "INVALID_RECORD",
            SignalingError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            SignalingError::Failure(f) => match f.kind {
                FailureKind::BadRequest => 400,
                FailureKind::Unauthorized => 403,
                FailureKind::NotFound => 404,
                FailureKind::Conflict => 409,
                FailureKind::Fatal => 500,
            },
            SignalingError::DatabaseError(_) => 503,
            SignalingError::InvalidRecord(_) | SignalingError::SystemError(_) => 500,
        }
    }
}

impl From<sqlx::Error> for SignalingError {
    fn from(e: sqlx::Error) -> Self {
        SignalingError::DatabaseError(e.to_string())
    }
}

impl From<anyhow::Error> for SignalingError {
    fn from(e: anyhow::Error) -> Self {
        SignalingError::SystemError(e.to_string())
    }
}

impl From<serde_json::Error> for SignalingError {
    fn from(e: serde_json::Error) -> Self {
        SignalingError::InvalidRecord(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SignalingError::not_found("df1").code(), "NOT_FOUND");
        assert_eq!(SignalingError::conflict("leased").code(), "CONFLICT");
        assert_eq!(
            SignalingError::DatabaseError("down".into()).code(),
            "DATABASE_ERROR"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(SignalingError::bad_request("x").http_status(), 400);
        assert_eq!(
            SignalingError::from(StatusFailure::unauthorized("x")).http_status(),
            403
        );
        assert_eq!(SignalingError::not_found("df1").http_status(), 404);
        assert_eq!(SignalingError::conflict("x").http_status(), 409);
        assert_eq!(
            SignalingError::from(StatusFailure::fatal("boom")).http_status(),
            500
        );
        assert_eq!(SignalingError::DatabaseError("x".into()).http_status(), 503);
    }

    #[test]
    fn test_kind() {
        assert_eq!(
            SignalingError::conflict("x").kind(),
            Some(FailureKind::Conflict)
        );
        assert_eq!(SignalingError::SystemError("x".into()).kind(), None);
    }

    #[test]
    fn test_display() {
        let err = SignalingError::not_found("df1");
        assert_eq!(err.to_string(), "NOT_FOUND: Data flow not found: df1");
    }
}

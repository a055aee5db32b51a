//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError` / `ApiResult`: handler error path, rendered as `ApiResponse<()>`
//! - `error_codes`: Standard error code constants

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::data_flow::{FailureKind, SignalingError};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    #[schema(example = 0)]
    pub code: i32,
    /// Response message
    #[schema(example = "ok")]
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create success response
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Create error response
    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

// ============================================================================
// Handler errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

/// 200 + success envelope
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error_codes::MISSING_AUTH, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, error_codes::FORBIDDEN, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_codes::FLOW_NOT_FOUND, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, error_codes::STATE_CONFLICT, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            msg,
        )
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl From<SignalingError> for ApiError {
    fn from(e: SignalingError) -> Self {
        match &e {
            SignalingError::Failure(f) => match f.kind {
                FailureKind::BadRequest => Self::bad_request(&f.reason),
                FailureKind::Unauthorized => Self::forbidden(&f.reason),
                FailureKind::NotFound => Self::not_found(&f.reason),
                FailureKind::Conflict => Self::conflict(&f.reason),
                FailureKind::Fatal => Self::internal(&f.reason),
            },
            SignalingError::DatabaseError(_) => {
                tracing::error!(error = %e, "Storage failure");
                Self::service_unavailable("Storage unavailable")
            }
            SignalingError::InvalidRecord(_) | SignalingError::SystemError(_) => {
                tracing::error!(error = %e, "Internal failure");
                Self::internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const FORBIDDEN: i32 = 2003;

    // Resource errors (4xxx)
    pub const FLOW_NOT_FOUND: i32 = 4001;
    pub const STATE_CONFLICT: i32 = 4009;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_flow::StatusFailure;

    #[test]
    fn test_failure_kind_to_status() {
        let cases = [
            (StatusFailure::bad_request("x"), StatusCode::BAD_REQUEST),
            (StatusFailure::unauthorized("x"), StatusCode::FORBIDDEN),
            (StatusFailure::not_found("x"), StatusCode::NOT_FOUND),
            (StatusFailure::conflict("x"), StatusCode::CONFLICT),
            (StatusFailure::fatal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (failure, status) in cases {
            let api: ApiError = SignalingError::from(failure).into();
            assert_eq!(api.status, status);
            assert_eq!(api.msg, "x");
        }
    }

    #[test]
    fn test_storage_error_is_unavailable() {
        let api: ApiError = SignalingError::DatabaseError("pool timed out".into()).into();
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api.msg, "Storage unavailable");
    }

    #[test]
    fn test_error_body_has_no_data() {
        let body = serde_json::to_value(ApiResponse::<()>::error(4001, "missing")).unwrap();
        assert_eq!(body["code"], 4001);
        assert!(body.get("data").is_none());
    }
}

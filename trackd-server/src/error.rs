//! API error type for trackd-server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// State-machine conflict (409) - e.g. publishing a running task
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage unavailable after retries (503)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// trackd-common error
    #[error("Common error: {0}")]
    Common(trackd_common::Error),
}

impl From<trackd_common::Error> for ApiError {
    fn from(err: trackd_common::Error) -> Self {
        match err {
            trackd_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            trackd_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            trackd_common::Error::State(e) => ApiError::Conflict(e.to_string()),
            trackd_common::Error::Unavailable(msg) => ApiError::Unavailable(msg),
            other => ApiError::Common(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "INVALID_TRANSITION", msg),
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORAGE_UNAVAILABLE",
                msg,
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_errors_map_to_conflict() {
        let err = trackd_common::types::TaskStatus::Completed
            .transition(trackd_common::types::TaskStatus::InProgress)
            .unwrap_err();
        let api: ApiError = trackd_common::Error::from(err).into();
        assert!(matches!(api, ApiError::Conflict(_)));
    }

    #[test]
    fn test_unavailable_maps_to_503() {
        let api: ApiError =
            trackd_common::Error::Unavailable("timed out".to_string()).into();
        let response = api.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

//! Error types for the thesis worker
//!
//! - `ApiError`: HTTP surface, rendered as `{"error":{"code","message"}}`
//! - `ServiceError`: failures of external collaborator calls
//! - `PipelineError`: the pipeline's error taxonomy

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

    /// Conflict (409), e.g. duplicate job id or scheduler shut down
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// thesis-common error
    #[error("Common error: {0}")]
    Common(#[from] thesis_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(thesis_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(thesis_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
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

/// External collaborator call failure
#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Service not configured or switched off (e.g. missing API key)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ServiceError {
    /// Timeouts, network errors, 5xx and 429 are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Timeout(_) | ServiceError::Network(_) => true,
            ServiceError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout(0)
        } else if err.is_decode() {
            ServiceError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            ServiceError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ServiceError::Network(err.to_string())
        }
    }
}

/// Pipeline error taxonomy
///
/// Only `Fatal` leaves the controller; the other variants are recovered where
/// they occur and show up in logs or job warnings.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Service still failing after retries
    #[error("Service call failed: {0}")]
    TransientService(#[from] ServiceError),

    /// Downloaded document rejected (format or size)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// SEARCH text of a patch block not found
    #[error("Patch block did not match: {0}")]
    PatchMismatch(String),

    /// Patch would shrink the chapter implausibly
    #[error("Patch rejected, result {result_len} chars from original {original_len}")]
    PatchCorruption {
        original_len: usize,
        result_len: usize,
    },

    /// Nothing left to work with; the job fails
    #[error("{0}")]
    Fatal(String),
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Fatal(_))
    }
}

impl From<thesis_common::Error> for PipelineError {
    fn from(err: thesis_common::Error) -> Self {
        PipelineError::Fatal(format!("Persistence failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ServiceError::Timeout(30).is_transient());
        assert!(ServiceError::Network("reset".into()).is_transient());
        assert!(ServiceError::Api { status: 503, message: String::new() }.is_transient());
        assert!(ServiceError::Api { status: 429, message: String::new() }.is_transient());
        assert!(!ServiceError::Api { status: 404, message: String::new() }.is_transient());
        assert!(!ServiceError::Unavailable("no key".into()).is_transient());
        assert!(!ServiceError::Parse("bad json".into()).is_transient());
    }

    #[test]
    fn test_only_fatal_is_fatal() {
        assert!(PipelineError::Fatal("x".into()).is_fatal());
        assert!(!PipelineError::Validation("x".into()).is_fatal());
    }
}

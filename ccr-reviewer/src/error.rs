//! Error types for ccr-reviewer
//!
//! `ApiError` is what handlers return. The pipeline errors carry the
//! underlying cause so the processors' callers can log or persist it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::services::content_flattener::WorkspaceError;
use crate::services::llm_client::LlmError;
use crate::services::repository_fetcher::FetchError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. deleting a classification still in use
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// ccr-common error
    #[error("Common error: {0}")]
    Common(#[from] ccr_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(err) => match err {
                ccr_common::Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
                ccr_common::Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
                ccr_common::Error::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
                other => {
                    tracing::error!(error = %other, "Request failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR", other.to_string())
                }
            },
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

/// Why a pipeline unit of work stopped
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(#[from] FetchError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] ccr_common::Error),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Cancelled")]
    Cancelled,
}

/// Standard-set ingest failed; no standards from the attempt remain
///
/// `standard_set_id` is `None` when the set could not even be registered.
#[derive(Debug, Error)]
#[error("Standard set {} ingest failed: {cause}", set_label(.standard_set_id))]
pub struct StandardSetProcessingError {
    pub standard_set_id: Option<Uuid>,
    #[source]
    pub cause: PipelineError,
}

fn set_label(standard_set_id: &Option<Uuid>) -> String {
    match standard_set_id {
        Some(id) => id.to_string(),
        None => "(unregistered)".to_string(),
    }
}

/// Compliance review failed; the review has been marked `failed`
#[derive(Debug, Error)]
#[error("Code review {review_id} failed: {cause}")]
pub struct ComplianceProcessingError {
    pub review_id: Uuid,
    #[source]
    pub cause: PipelineError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn status_and_code(err: ApiError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        (status, body["error"]["code"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_common_errors_map_to_http_status() {
        let cases = [
            (ccr_common::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ccr_common::Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (ccr_common::Error::Conflict("x".into()), StatusCode::CONFLICT),
            (ccr_common::Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let (status, _) = status_and_code(ApiError::from(err)).await;
            assert_eq!(status, expected);
        }
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let (status, code) = status_and_code(ApiError::BadRequest("bad".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "BAD_REQUEST");
    }

    #[test]
    fn test_processing_error_keeps_cause() {
        let err = ComplianceProcessingError {
            review_id: Uuid::nil(),
            cause: PipelineError::Llm(LlmError::Unavailable("connection refused".into())),
        };
        let text = err.to_string();
        assert!(text.contains("connection refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_unregistered_set_error_names_no_id() {
        let err = StandardSetProcessingError {
            standard_set_id: None,
            cause: PipelineError::Persistence(ccr_common::Error::InvalidInput("name is empty".into())),
        };
        let text = err.to_string();
        assert!(text.starts_with("Standard set (unregistered) ingest failed"));
        assert!(!text.contains(&Uuid::nil().to_string()));
    }
}

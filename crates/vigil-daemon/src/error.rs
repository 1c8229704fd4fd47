//! Error types for the HTTP handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use vigil_core::GenerationError;

use crate::store::StoreError;

/// Errors a handler can answer with.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body is not JSON or is missing a required field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The event `type` is not a known event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The event journal could not be written.
    #[error("event storage failed: {0}")]
    Storage(#[from] StoreError),

    /// No question set could be assembled for a valid request.
    #[error("question set unavailable: {0}")]
    QuestionsUnavailable(GenerationError),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    ///
    /// - Invalid request, unknown event type: 400 Bad Request
    /// - Storage, exhausted question supply: 500 Internal Server Error
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::UnknownEventType(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) | Self::QuestionsUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::InvalidRequest { reason } => Self::InvalidRequest(reason),
            other => Self::QuestionsUnavailable(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Validation messages help the caller; server-side failures stay opaque.
        let message = match &self {
            Self::InvalidRequest(_) | Self::UnknownEventType(_) => self.to_string(),
            Self::Storage(_) => {
                error!(error = %self, "event storage failed");
                "Internal server error".to_string()
            },
            Self::QuestionsUnavailable(_) => {
                error!(error = %self, "question supply exhausted");
                "Unable to assemble a question set".to_string()
            },
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError::invalid("sessionId is required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::UnknownEventType("telepathy".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::QuestionsUnavailable(GenerationError::InsufficientQuestions {
                requested: 10,
                available: 3,
            })
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn invalid_generation_requests_are_client_errors() {
        let err: ApiError = GenerationError::invalid("count must be between 1 and 20").into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn internal_details_are_not_leaked() {
        let err = ApiError::QuestionsUnavailable(GenerationError::bank("bank.json: missing field"));
        let body = err.into_response().into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("bank.json"));
        assert!(text.contains("\"success\":false"));
    }
}

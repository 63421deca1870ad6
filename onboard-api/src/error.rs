//! Error types for onboard-api

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use onboard_common::validation::{FieldError, ValidationErrors};
use serde_json::json;
use thiserror::Error;

use crate::db::PersistenceError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Field-level validation failures (400)
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Upload exceeds the configured size (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Conflict (409), e.g. duplicate CIF
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage failure; details are logged, not returned
    #[error(transparent)]
    Persistence(PersistenceError),
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::DuplicateKey { .. } => ApiError::Conflict(err.to_string()),
            other => ApiError::Persistence(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut fields: Option<Vec<FieldError>> = None;
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Validation(errors) => {
                let message = errors.to_string();
                fields = Some(errors.0);
                (StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
            }
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Persistence(ref err) => {
                tracing::error!(error = %err, "Persistence failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PERSISTENCE_FAILED",
                    "Failed to store application".to_string(),
                )
            }
        };

        let mut error = json!({
            "code": error_code,
            "message": message,
        });
        if let Some(fields) = fields {
            error["fields"] = json!(fields);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_key_maps_to_conflict() {
        let err: ApiError = PersistenceError::DuplicateKey {
            field: "CIF".into(),
            value: "DE1".into(),
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_validation_lists_fields() {
        let err = ApiError::Validation(ValidationErrors(vec![FieldError::new(
            "CIF",
            "CIF is required",
        )]));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["fields"][0]["field"], "CIF");
    }

    #[tokio::test]
    async fn test_persistence_details_hidden() {
        let err: ApiError = PersistenceError::Corrupt("secret detail".into()).into();
        let body = body_json(err.into_response()).await;
        assert_eq!(body["error"]["message"], "Failed to store application");
    }
}

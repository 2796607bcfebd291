//! Error types for callgate-ingest
//!
//! Every error leaves the service as `{"error": {"code", "message"}}`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{AdmissionError, SubmitError};

/// Seconds a client should wait before retrying an overloaded submission
const RETRY_AFTER_SECS: u64 = 1;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Webhook admission rejected (400/401/403/413/429/500)
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Pipeline refused the ingestion (503 or 500)
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Missing or invalid request signature (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// callgate-common error
    #[error("Common error: {0}")]
    Common(#[from] callgate_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_after = None;

        let (status, error_code, message) = match self {
            ApiError::Admission(ref err) => (err.status_code(), err.code(), err.public_message()),
            ApiError::Submit(SubmitError::Overloaded { .. }) => {
                retry_after = Some(RETRY_AFTER_SECS);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "OVERLOADED",
                    "Pipeline at capacity, retry later".to_string(),
                )
            }
            ApiError::Submit(SubmitError::ShuttingDown) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SHUTTING_DOWN",
                "Service is shutting down".to_string(),
            ),
            ApiError::Submit(SubmitError::Store(ref err)) => {
                tracing::error!("Status store failure: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
            ApiError::Common(ref err) => {
                tracing::error!("Common error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

//! HTTP error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Result alias for handler code.
pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced by API handlers as JSON responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Client sent an unusable request
    #[error("{0}")]
    BadRequest(String),

    /// The server is missing configuration for this endpoint
    #[error("{0}")]
    NotConfigured(String),

    /// An upstream service failed
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Anything else
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotConfigured(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Internal(e) => {
                error!("internal error: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

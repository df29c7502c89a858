//! Error Handling Utilities
//!
//! HTTP-facing error type and JSON error body for the API layer.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main application error type returned by HTTP handlers
#[derive(Error, Debug)]
pub enum AppError {
    /// Validation errors for user input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed or unusable request data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Authentication and authorization errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate resources)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String, retry_after: u64 },

    /// Generic internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Standard error response structure for API endpoints
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            details: None,
        }
    }

    pub fn with_details(error: &str, message: &str, details: serde_json::Value) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            details: Some(details),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, error_code, message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, "AUTHENTICATION_ERROR", msg)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            AppError::RateLimit {
                message,
                retry_after: seconds,
            } => {
                retry_after = Some(seconds);
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED", message)
            }
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred".to_string(),
            ),
        };

        let error_response = match retry_after {
            Some(seconds) => ErrorResponse::with_details(
                error_code,
                &message,
                serde_json::json!({ "retry_after_seconds": seconds }),
            ),
            None => ErrorResponse::new(error_code, &message),
        };

        let mut response = (status, Json(error_response)).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

/// Result type alias for operations that can return AppError
pub type AppResult<T> = Result<T, AppError>;

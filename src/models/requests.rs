//! Request and Response Models
//!
//! Data structures for API request and response payloads with validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::validation::{email_validator, password_validator};

/// Request payload for creating a new account
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    /// 8-128 characters
    #[validate(custom(function = "password_validator"))]
    pub password: String,
}

/// Request payload for password login
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password cannot be empty"))]
    pub password: String,
}

/// Request payload for refresh rotation
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Refresh token cannot be empty"))]
    pub refresh_token: String,
}

/// Request payload for logout; the refresh token is optional and best-effort
#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// Query string for the email verification link
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyEmailQuery {
    #[validate(length(min = 1, message = "Token cannot be empty"))]
    pub token: String,
}

/// Request payload for starting a password reset
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,
}

/// Request payload for completing a password reset
#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetConfirmRequest {
    #[validate(length(min = 1, message = "Token cannot be empty"))]
    pub token: String,

    #[validate(custom(function = "password_validator"))]
    pub new_password: String,
}

/// Plain message response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response for login and refresh
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthTokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub session_id: i64,
}

/// Response for health check
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

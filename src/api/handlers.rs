//! HTTP Request Handlers
//!
//! Axum handlers translating HTTP requests into [`AuthService`] calls.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use log::warn;
use validator::Validate;

use super::middleware::AuthUser;
use crate::{
    config::RateLimitingConfig,
    models::{requests::*, ClientMeta, IssuedSession, SessionResponse, User},
    service::{AuthError, AuthService, RateLimiter},
    utils::{error::AppResult, validation::normalize_email, AppError},
    VERSION,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limiting: RateLimitingConfig,
}

impl AppState {
    pub fn new(
        auth_service: Arc<AuthService>,
        rate_limiter: Arc<RateLimiter>,
        rate_limiting: RateLimitingConfig,
    ) -> Self {
        Self {
            auth_service,
            rate_limiter,
            rate_limiting,
        }
    }

    fn tokens_response(&self, issued: IssuedSession) -> AuthTokensResponse {
        AuthTokensResponse {
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.auth_service.access_token_expires_in(),
            session_id: issued.session.id,
        }
    }
}

/// Standard success response wrapper
#[derive(serde::Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Rate limit key for password login attempts
pub fn login_rate_limit_key(email: &str, ip: &str) -> String {
    format!("login:{}:{}", normalize_email(email), ip)
}

/// Create an account and send its verification email
pub async fn register(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(request): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<SuccessResponse<User>>)> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid registration data: {}", e)))?;

    let user = state
        .auth_service
        .register_and_send_verification(&request.email, &request.password, &meta)
        .await?;

    Ok((StatusCode::CREATED, Json(SuccessResponse::new(user))))
}

/// Password login, throttled per email and client IP
pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<SuccessResponse<AuthTokensResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid login data: {}", e)))?;

    let decision = state
        .rate_limiter
        .is_allowed(
            &login_rate_limit_key(&request.email, &meta.ip),
            state.rate_limiting.login_limit,
            state.rate_limiting.login_window_seconds,
        )
        .await;
    if !decision.allowed {
        warn!("Login throttled for {}", meta.ip);
        return Err(AuthError::RateLimited {
            retry_after_seconds: decision.retry_after_seconds,
        }
        .into());
    }

    let issued = state
        .auth_service
        .login_with_meta(&request.email, &request.password, &meta)
        .await?;

    Ok(Json(SuccessResponse::new(state.tokens_response(issued))))
}

/// Rotate a refresh token into a new token pair
pub async fn refresh_token(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(request): Json<RefreshTokenRequest>,
) -> AppResult<Json<SuccessResponse<AuthTokensResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid refresh request: {}", e)))?;

    let issued = state
        .auth_service
        .refresh(&request.refresh_token, &meta)
        .await?;

    Ok(Json(SuccessResponse::new(state.tokens_response(issued))))
}

/// Revoke the session behind a refresh token, if one is supplied. Always succeeds.
pub async fn logout(
    State(state): State<AppState>,
    meta: ClientMeta,
    request: Option<Json<LogoutRequest>>,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();

    state
        .auth_service
        .logout(request.refresh_token.as_deref(), &meta)
        .await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new("logged out"))))
}

/// Issue a fresh verification token for the caller
pub async fn resend_verification(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    state.auth_service.resend_verification(auth.user_id).await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new(
        "verification email sent",
    ))))
}

/// Target of the link in verification emails
pub async fn verify_email(
    State(state): State<AppState>,
    meta: ClientMeta,
    Query(query): Query<VerifyEmailQuery>,
) -> AppResult<Json<SuccessResponse<User>>> {
    query
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid verification request: {}", e)))?;

    let user = state.auth_service.verify_email(&query.token, &meta).await?;

    Ok(Json(SuccessResponse::new(user)))
}

/// Start a password reset; the response is the same whether or not the account exists
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid password reset request: {}", e)))?;

    let message = state
        .auth_service
        .request_password_reset(&request.email)
        .await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new(message))))
}

/// Complete a password reset with a one-time token
pub async fn reset_password(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(request): Json<PasswordResetConfirmRequest>,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid password reset data: {}", e)))?;

    state
        .auth_service
        .reset_password(&request.token, &request.new_password, &meta)
        .await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new(
        "password updated",
    ))))
}

/// Profile of the authenticated caller
pub async fn me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<SuccessResponse<User>>> {
    let user = state.auth_service.current_user(auth.user_id).await?;
    Ok(Json(SuccessResponse::new(user)))
}

/// All of the caller's sessions, newest first
pub async fn list_sessions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<SuccessResponse<Vec<SessionResponse>>>> {
    let sessions = state
        .auth_service
        .list_sessions(auth.user_id)
        .await?
        .into_iter()
        .map(SessionResponse::from)
        .collect();

    Ok(Json(SuccessResponse::new(sessions)))
}

/// Revoke one of the caller's sessions
pub async fn revoke_session(
    State(state): State<AppState>,
    auth: AuthUser,
    meta: ClientMeta,
    Path(session_id): Path<i64>,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    state
        .auth_service
        .revoke_session(auth.user_id, session_id, &meta)
        .await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new(
        "session revoked",
    ))))
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse<HealthCheckResponse>> {
    let response = HealthCheckResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: VERSION.to_string(),
    };

    Json(SuccessResponse::new(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response_creation() {
        let data = "test data";
        let response = SuccessResponse::new(data);
        assert!(response.success);
        assert_eq!(response.data, "test data");
    }

    #[test]
    fn test_login_rate_limit_key_normalizes_email() {
        assert_eq!(
            login_rate_limit_key("  Alice@Example.COM ", "10.0.0.1"),
            "login:alice@example.com:10.0.0.1"
        );
    }

    #[tokio::test]
    async fn test_health_check_reports_version() {
        let Json(response) = health_check().await;
        assert!(response.success);
        assert_eq!(response.data.status, "healthy");
        assert_eq!(response.data.version, VERSION);
    }
}

//! Request Extractors
//!
//! Client metadata and bearer authentication for API endpoints.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{
        header::{AUTHORIZATION, USER_AGENT},
        request::Parts,
        HeaderMap,
    },
};

use super::handlers::AppState;
use crate::models::ClientMeta;
use crate::utils::error::AppError;

/// Reported when the peer address is not available
pub const UNKNOWN_CLIENT_IP: &str = "0.0.0.0";

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT_IP.to_string());

        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        Ok(ClientMeta::new(ip, user_agent))
    }
}

/// Authenticated caller, resolved from an `Authorization: Bearer` access token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let user_id = state.auth_service.authenticate_access(token)?;
        Ok(AuthUser { user_id })
    }
}

/// Extract the token from a `Bearer` authorization header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| AppError::Authentication("Missing Authorization header".into()))?;

    match auth_header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AppError::Authentication(
            "Invalid Authorization header format".into(),
        )),
    }
}

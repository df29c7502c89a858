//! API Route Definitions
//!
//! HTTP routes and their handlers, assembled with a builder so a deployment can
//! expose only the endpoint groups it needs.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::*;

/// Builder for creating API routes with configurable endpoint groups
///
/// All groups are disabled by default; use the presets for common setups.
#[derive(Default)]
pub struct RouterBuilder {
    /// GET /health
    health_check: bool,
    /// POST /auth/register, POST /auth/resend-verification, GET /auth/verify-email
    registration: bool,
    /// POST /auth/login, POST /auth/refresh, POST /auth/logout
    password_login: bool,
    /// POST /auth/request-password-reset, POST /auth/reset-password
    password_reset: bool,
    /// GET /users/me
    profile: bool,
    /// GET /sessions, POST /sessions/{id}/revoke
    sessions: bool,
}

impl RouterBuilder {
    /// Creates a new router builder with all routes disabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router builder with every endpoint group enabled
    pub fn with_all_routes() -> Self {
        Self {
            health_check: true,
            registration: true,
            password_login: true,
            password_reset: true,
            profile: true,
            sessions: true,
        }
    }

    /// Creates a router with only the health check, for monitoring
    pub fn with_minimal_routes() -> Self {
        Self {
            health_check: true,
            ..Self::default()
        }
    }

    /// Enables or disables the health check endpoint (GET /health)
    pub fn health_check(mut self, enabled: bool) -> Self {
        self.health_check = enabled;
        self
    }

    /// Enables or disables account registration and email verification
    ///
    /// Disable this when accounts are provisioned out of band, for example
    /// with the admin CLI.
    pub fn registration(mut self, enabled: bool) -> Self {
        self.registration = enabled;
        self
    }

    /// Enables or disables login, refresh rotation and logout
    pub fn password_login(mut self, enabled: bool) -> Self {
        self.password_login = enabled;
        self
    }

    /// Enables or disables the password reset flow
    pub fn password_reset(mut self, enabled: bool) -> Self {
        self.password_reset = enabled;
        self
    }

    /// Enables or disables the profile endpoint (GET /users/me)
    pub fn profile(mut self, enabled: bool) -> Self {
        self.profile = enabled;
        self
    }

    /// Enables or disables session listing and revocation
    pub fn sessions(mut self, enabled: bool) -> Self {
        self.sessions = enabled;
        self
    }

    /// Builds the Axum router with the configured routes
    pub fn build(self) -> Router<AppState> {
        let mut router = Router::new();

        if self.health_check {
            router = router.route("/health", get(health_check));
        }

        if self.registration {
            router = router
                .route("/auth/register", post(register))
                .route("/auth/resend-verification", post(resend_verification))
                .route("/auth/verify-email", get(verify_email));
        }

        if self.password_login {
            router = router
                .route("/auth/login", post(login))
                .route("/auth/refresh", post(refresh_token))
                .route("/auth/logout", post(logout));
        }

        if self.password_reset {
            router = router
                .route("/auth/request-password-reset", post(request_password_reset))
                .route("/auth/reset-password", post(reset_password));
        }

        if self.profile {
            router = router.route("/users/me", get(me));
        }

        if self.sessions {
            router = router
                .route("/sessions", get(list_sessions))
                .route("/sessions/{id}/revoke", post(revoke_session));
        }

        router
    }
}

/// Creates all API routes
pub fn create_routes() -> Router<AppState> {
    RouterBuilder::with_all_routes().build()
}

/// Creates router with the health check only
pub fn create_minimal_routes() -> Router<AppState> {
    RouterBuilder::with_minimal_routes().build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, RateLimitingConfig};
    use crate::service::{AuthService, LogEmailSender, RateLimiter};
    use crate::store::MemoryStore;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn create_test_state() -> AppState {
        let auth_service = AuthService::new(
            Arc::new(MemoryStore::new()),
            AuthConfig::new("router-test-secret"),
            Arc::new(LogEmailSender),
        );
        AppState::new(
            Arc::new(auth_service),
            Arc::new(RateLimiter::in_memory()),
            RateLimitingConfig::default(),
        )
    }

    async fn status_of(router: Router<AppState>, method: &str, uri: &str) -> StatusCode {
        let app = router.with_state(create_test_state());
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[test]
    fn test_router_builder_new() {
        let builder = RouterBuilder::new();
        assert!(!builder.health_check);
        assert!(!builder.registration);
        assert!(!builder.password_login);
        assert!(!builder.password_reset);
        assert!(!builder.profile);
        assert!(!builder.sessions);
    }

    #[test]
    fn test_router_builder_with_all_routes() {
        let builder = RouterBuilder::with_all_routes();
        assert!(builder.health_check);
        assert!(builder.registration);
        assert!(builder.password_login);
        assert!(builder.password_reset);
        assert!(builder.profile);
        assert!(builder.sessions);
    }

    #[test]
    fn test_router_builder_with_minimal_routes() {
        let builder = RouterBuilder::with_minimal_routes();
        assert!(builder.health_check);
        assert!(!builder.registration);
        assert!(!builder.password_login);
        assert!(!builder.sessions);
    }

    #[test]
    fn test_router_builder_individual_methods() {
        let builder = RouterBuilder::new()
            .health_check(true)
            .registration(false)
            .password_login(true)
            .password_reset(false)
            .profile(true)
            .sessions(false);

        assert!(builder.health_check);
        assert!(!builder.registration);
        assert!(builder.password_login);
        assert!(!builder.password_reset);
        assert!(builder.profile);
        assert!(!builder.sessions);
    }

    #[tokio::test]
    async fn test_minimal_router_serves_only_health() {
        assert_eq!(
            status_of(create_minimal_routes(), "GET", "/health").await,
            StatusCode::OK
        );
        assert_eq!(
            status_of(create_minimal_routes(), "GET", "/users/me").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_protected_routes_require_bearer_token() {
        assert_eq!(
            status_of(create_routes(), "GET", "/users/me").await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(create_routes(), "GET", "/sessions").await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(create_routes(), "POST", "/sessions/1/revoke").await,
            StatusCode::UNAUTHORIZED
        );
    }
}

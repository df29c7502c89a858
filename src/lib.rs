//! Auth Service Library
//!
//! Credential and session lifecycle for a web backend: password registration
//! and login, rotating refresh sessions, one-time email tokens for verification
//! and password reset, an append-only audit trail, and fixed-window login
//! throttling backed by Redis with an in-process fallback.
//!
//! # Features
//!
//! - **Password Security**: argon2 hashing with self-describing PHC strings
//! - **Rotating Sessions**: every refresh revokes its session and issues a successor;
//!   a replayed refresh token is rejected
//! - **One-Time Tokens**: single-use, expiring tokens for email verification and reset
//! - **Login Throttling**: fixed-window counters shared through Redis, degrading to
//!   per-process counters when Redis is slow or unreachable
//! - **Pluggable Storage**: PostgreSQL via SQLx, or an in-memory store for tests
//! - **Flexible Router**: configurable endpoint groups via the RouterBuilder pattern
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use auth_service::{
//!     api::{AppState, RouterBuilder},
//!     config::{AuthConfig, RateLimitingConfig},
//!     service::{AuthService, LogEmailSender, RateLimiter},
//!     store::MemoryStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auth_service = AuthService::new(
//!         Arc::new(MemoryStore::new()),
//!         AuthConfig::new("change-me"),
//!         Arc::new(LogEmailSender),
//!     );
//!
//!     let state = AppState::new(
//!         Arc::new(auth_service),
//!         Arc::new(RateLimiter::in_memory()),
//!         RateLimitingConfig::default(),
//!     );
//!
//!     let app = RouterBuilder::with_all_routes().build().with_state(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **API Layer**: HTTP handlers, extractors and configurable routes
//! - **Service Layer**: the auth engine, token codec, hashing, rate limiting, email
//! - **Store**: persistence contracts with PostgreSQL and in-memory implementations
//! - **Models**: entities and request/response structures
//! - **Database**: connection pooling and migrations
//! - **Utils**: errors, token generation, validation

/// HTTP API layer with handlers and configurable routing
pub mod api;

/// Configuration loaded from the environment
pub mod config;

/// Database connection management and migrations
pub mod database;

/// Data models and request/response structures
pub mod models;

/// Authentication engine and its collaborators
pub mod service;

/// Persistence contracts and implementations
pub mod store;

/// Shared utilities for security, validation, and error handling
pub mod utils;

// Re-export commonly used types for convenient access
pub use api::{create_routes, AppState, RouterBuilder};
pub use models::{
    AuditAction, AuditLogEntry, Claims, ClientMeta, IssuedSession, OneTimeToken, Session,
    SessionState, TokenPurpose, TokenType, User,
};
pub use service::{AuthError, AuthResult, AuthService, RateLimitDecision, RateLimiter};
pub use store::{MemoryStore, PgStore, Store, StoreError};
pub use utils::error::{AppError, AppResult, ErrorResponse};

// Re-export database utilities for configuration
pub use database::{DatabaseConfig, DatabasePool};

// Re-export configuration system
pub use config::{env, AppConfig, AuthConfig, EmailConfig, RateLimitingConfig, ServerConfig};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

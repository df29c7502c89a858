//! Service Layer
//!
//! Authentication engine and the primitives it is built from.

pub mod audit_service;
pub mod auth_service;
pub mod email_service;
pub mod jwt;
pub mod password;
pub mod rate_limit_service;

// Re-export services
pub use audit_service::AuditTrail;
pub use auth_service::{AuthError, AuthResult, AuthService, PASSWORD_RESET_REQUESTED};
pub use email_service::{EmailError, EmailSender, LogEmailSender, SmtpEmailSender};
pub use jwt::{TokenCodec, TokenError};
pub use password::{Argon2PasswordHasher, HashingError, PasswordHasher};
pub use rate_limit_service::{
    CounterStore, RateLimitDecision, RateLimitError, RateLimiter, RedisCounterStore,
};

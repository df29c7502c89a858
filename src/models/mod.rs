//! Data Models Module
//!
//! Entities owned by the store (users, sessions, one-time tokens, audit
//! records), token claims, and request/response types.

pub mod audit;
pub mod auth;
pub mod one_time_token;
pub mod requests;
pub mod session;
pub mod user;

// Re-export commonly used types
pub use audit::{AuditAction, AuditLogEntry, ClientMeta, NewAuditEntry};
pub use auth::{Claims, IssuedSession, TokenType};
pub use one_time_token::{NewOneTimeToken, OneTimeToken, TokenPurpose};
pub use requests::*;
pub use session::{NewSession, Session, SessionResponse, SessionState};
pub use user::{Role, User, UserWithPassword};

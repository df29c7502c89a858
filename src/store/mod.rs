//! Persistence Contracts
//!
//! Async traits over the relational store used by the auth engine, with an
//! in-memory arena implementation and a PostgreSQL implementation.
//!
//! Compound operations (`rotate_session`, `consume_token` and the
//! `consume_token_and_*` pair) must be atomic with respect to concurrent
//! callers: exactly one caller may win a given session or token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    AuditLogEntry, NewAuditEntry, NewOneTimeToken, NewSession, OneTimeToken, Role, Session,
    TokenPurpose, UserWithPassword,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store-level errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unique constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. Fails with `Conflict` when the email is taken.
    async fn create_user(&self, email: &str, password_hash: &str)
        -> StoreResult<UserWithPassword>;

    async fn get_user(&self, user_id: i64) -> StoreResult<Option<UserWithPassword>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserWithPassword>>;

    async fn update_password(&self, user_id: i64, password_hash: &str) -> StoreResult<()>;

    async fn mark_email_verified(&self, user_id: i64) -> StoreResult<()>;

    /// Insert a role. Fails with `Conflict` when the name is taken.
    async fn create_role(&self, name: &str) -> StoreResult<Role>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    /// Point a user at a role, or clear it with `None`. Fails with `NotFound`
    /// when either side is missing.
    async fn assign_role(&self, user_id: i64, role_id: Option<i64>) -> StoreResult<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> StoreResult<Session>;

    async fn get_session(&self, session_id: i64) -> StoreResult<Option<Session>>;

    /// All sessions of a user, active and revoked, newest first
    async fn list_sessions(&self, user_id: i64) -> StoreResult<Vec<Session>>;

    /// Revoke a session owned by `user_id`. Returns false when the session does
    /// not exist or belongs to someone else; already-revoked sessions keep their
    /// original `revoked_at` and return true.
    async fn revoke_session(
        &self,
        user_id: i64,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Revoke `old_session_id` and insert `successor` as one atomic unit.
    ///
    /// Returns `None` without writing anything when the old session is missing,
    /// owned by another user, or already revoked.
    async fn rotate_session(
        &self,
        user_id: i64,
        old_session_id: i64,
        successor: NewSession,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>>;
}

#[async_trait]
pub trait OneTimeTokenStore: Send + Sync {
    /// Persist an unused token. Fails with `Conflict` on a duplicate token string.
    async fn create_token(&self, token: NewOneTimeToken) -> StoreResult<OneTimeToken>;

    /// Mark the token used and return it, only if it matches `purpose`, is
    /// unused and has not expired at `now`.
    async fn consume_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeToken>>;

    /// Consume a `VerifyEmail` token and mark its owner verified in one unit.
    /// Returns `None` without writing when the token is not consumable; a
    /// missing owner fails with `NotFound` and leaves the token unused.
    async fn consume_token_and_verify_email(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeToken>>;

    /// Consume a `ResetPassword` token and store `password_hash` for its owner
    /// in one unit, with the same outcomes as `consume_token_and_verify_email`.
    async fn consume_token_and_set_password(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeToken>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry>;
}

/// Everything the auth engine needs from persistence
pub trait Store: UserStore + SessionStore + OneTimeTokenStore + AuditStore {}

impl<T> Store for T where T: UserStore + SessionStore + OneTimeTokenStore + AuditStore {}

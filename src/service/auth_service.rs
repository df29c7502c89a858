//! Authentication Service
//!
//! Password registration and login, refresh-session rotation, one-time email
//! tokens, and the flows built on them (email verification, password reset,
//! session management). Every security-relevant success is written to the
//! audit trail.
//!
//! Sessions move one way: `Active` to `Revoked`. A refresh token is good for
//! exactly one rotation; presenting it again fails because its session is
//! already revoked.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;

use crate::config::AuthConfig;
use crate::models::{
    AuditAction, ClientMeta, IssuedSession, NewOneTimeToken, NewSession, OneTimeToken, Session,
    TokenPurpose, TokenType, User,
};
use crate::service::{
    audit_service::AuditTrail,
    email_service::EmailSender,
    jwt::{TokenCodec, TokenError},
    password::{Argon2PasswordHasher, HashingError, PasswordHasher},
};
use crate::store::{Store, StoreError};
use crate::utils::{
    error::AppError,
    security::{fingerprint, generate_secure_token, hash_sensitive_data, TOKEN_ENTROPY_BYTES},
    validation::{messages, normalize_email, validate_email, validate_password},
};

/// Response message for password reset requests, whether or not the email matched
pub const PASSWORD_RESET_REQUESTED: &str = "if account exists, reset email sent";

/// Plaintext behind the hash checked for unknown or inactive accounts
const DUMMY_PASSWORD: &str = "dummy-password-for-timing";

/// Custom error types for the auth service
#[derive(Error, Debug)]
pub enum AuthError {
    /// Unknown email, wrong password, or inactive account
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    /// Session missing, owned by someone else, or already revoked
    #[error("Invalid session")]
    InvalidSession,

    /// Bad signature, malformed token, or expired
    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid token type")]
    WrongTokenType,

    /// One-time token unknown, already used, expired, or for another purpose
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("Too many attempts, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("User not found")]
    UserNotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Hashing(#[from] HashingError),

    #[error("Token issuance failed: {0}")]
    TokenIssue(String),

    /// Store failures are fatal and propagate unchanged
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidToken(_) => AuthError::InvalidToken,
            TokenError::WrongTokenType { .. } => AuthError::WrongTokenType,
            TokenError::Encoding(msg) => AuthError::TokenIssue(msg),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => {
                AppError::Authentication("Invalid credentials".to_string())
            }
            AuthError::InvalidSession => AppError::Authentication("Invalid session".to_string()),
            AuthError::InvalidToken | AuthError::WrongTokenType => {
                AppError::Authentication("Invalid token".to_string())
            }
            AuthError::EmailAlreadyRegistered => {
                AppError::Conflict("Email already registered".to_string())
            }
            AuthError::InvalidOrExpiredToken => {
                AppError::BadRequest("Invalid or expired token".to_string())
            }
            AuthError::RateLimited {
                retry_after_seconds,
            } => AppError::RateLimit {
                message: format!("Too many attempts. Try again in {}s", retry_after_seconds),
                retry_after: retry_after_seconds,
            },
            AuthError::UserNotFound => AppError::NotFound("User not found".to_string()),
            AuthError::Validation(msg) => AppError::Validation(msg),
            AuthError::Hashing(e) => AppError::Internal(e.to_string()),
            AuthError::TokenIssue(msg) => AppError::Internal(msg),
            AuthError::Store(e) => AppError::Internal(e.to_string()),
        }
    }
}

/// Result type for auth service operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication engine
pub struct AuthService {
    store: Arc<dyn Store>,
    audit: AuditTrail,
    hasher: Arc<dyn PasswordHasher>,
    codec: TokenCodec,
    email: Arc<dyn EmailSender>,
    config: AuthConfig,
    dummy_hash: OnceLock<String>,
}

impl AuthService {
    pub fn new<S>(store: Arc<S>, config: AuthConfig, email: Arc<dyn EmailSender>) -> Self
    where
        S: Store + 'static,
    {
        Self {
            audit: AuditTrail::new(store.clone()),
            store,
            hasher: Arc::new(Argon2PasswordHasher::new()),
            codec: TokenCodec::new(&config.secret_key),
            email,
            config,
            dummy_hash: OnceLock::new(),
        }
    }

    /// Replace the default Argon2 hasher
    pub fn with_password_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self.dummy_hash = OnceLock::new();
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Access token lifetime in seconds
    pub fn access_token_expires_in(&self) -> i64 {
        self.config.access_token_ttl().num_seconds()
    }

    /// Keyed device tag for a client
    pub fn fingerprint(&self, ip: &str, user_agent: &str) -> String {
        fingerprint(self.config.secret_key.as_bytes(), ip, user_agent)
    }

    // ============================================================================
    // Credentials and sessions
    // ============================================================================

    /// Create an account. Emails are normalized before the uniqueness check.
    pub async fn register(&self, email: &str, password: &str) -> AuthResult<User> {
        let email = normalize_email(email);
        if !validate_email(&email) {
            return Err(AuthError::Validation(messages::INVALID_EMAIL.to_string()));
        }
        if !validate_password(password) {
            return Err(AuthError::Validation(messages::INVALID_PASSWORD.to_string()));
        }

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyRegistered);
        }

        let password_hash = self.hasher.hash(password)?;
        let user = self
            .store
            .create_user(&email, &password_hash)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => AuthError::EmailAlreadyRegistered,
                other => AuthError::Store(other),
            })?;

        info!("Registered user {}", user.id);
        Ok(user.into())
    }

    /// Check credentials and open a new session
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        meta: &ClientMeta,
    ) -> AuthResult<IssuedSession> {
        let email = normalize_email(email);
        let verified = match self.store.find_user_by_email(&email).await? {
            Some(user) if user.is_active => {
                self.hasher.verify(password, &user.password_hash).then_some(user)
            }
            _ => {
                self.verify_dummy(password);
                None
            }
        };
        let Some(user) = verified else {
            warn!("Rejected login from {}", meta.ip);
            return Err(AuthError::InvalidCredentials);
        };

        let issued = self.create_session(user.id, meta).await?;
        info!("User {} logged in, session {}", user.id, issued.session.id);
        Ok(issued)
    }

    /// Persist a new session for `user_id` and mint its token pair
    pub async fn create_session(&self, user_id: i64, meta: &ClientMeta) -> AuthResult<IssuedSession> {
        let session = self
            .store
            .create_session(self.new_session_row(user_id, meta))
            .await?;
        self.issue_tokens(session)
    }

    /// Revoke `session_id` and open its successor. Fails with `InvalidSession`
    /// when the session is missing, owned by another user, or already revoked.
    pub async fn rotate_refresh(
        &self,
        user_id: i64,
        session_id: i64,
        meta: &ClientMeta,
    ) -> AuthResult<IssuedSession> {
        let successor = self.new_session_row(user_id, meta);
        match self
            .store
            .rotate_session(user_id, session_id, successor, Utc::now())
            .await?
        {
            Some(session) => {
                info!(
                    "Rotated session {} -> {} for user {}",
                    session_id, session.id, user_id
                );
                self.issue_tokens(session)
            }
            None => {
                warn!(
                    "Refused rotation of session {} for user {}: not active",
                    session_id, user_id
                );
                Err(AuthError::InvalidSession)
            }
        }
    }

    /// Run a full verification against a throwaway hash
    fn verify_dummy(&self, password: &str) {
        let hash = self.dummy_hash.get_or_init(|| {
            self.hasher.hash(DUMMY_PASSWORD).unwrap_or_else(|e| {
                warn!("Could not prepare dummy password hash: {}", e);
                String::new()
            })
        });
        let _ = self.hasher.verify(password, hash);
    }

    fn new_session_row(&self, user_id: i64, meta: &ClientMeta) -> NewSession {
        // Only the digest of the random secret is kept
        let secret = generate_secure_token(TOKEN_ENTROPY_BYTES);
        NewSession {
            user_id,
            refresh_token_hash: hash_sensitive_data(&secret),
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            device_fingerprint: self.fingerprint(&meta.ip, &meta.user_agent),
        }
    }

    fn issue_tokens(&self, session: Session) -> AuthResult<IssuedSession> {
        let subject = session.user_id.to_string();
        let access_token = self.codec.issue(
            &subject,
            self.config.access_token_ttl(),
            TokenType::Access,
            None,
        )?;
        let refresh_token = self.codec.issue(
            &subject,
            self.config.refresh_token_ttl(),
            TokenType::Refresh,
            Some(session.id),
        )?;

        Ok(IssuedSession {
            access_token,
            refresh_token,
            session,
        })
    }

    // ============================================================================
    // One-time tokens
    // ============================================================================

    /// Persist a fresh unused token. Sending it is the caller's job.
    pub async fn request_email_token(
        &self,
        user_id: i64,
        purpose: TokenPurpose,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<OneTimeToken> {
        let token = self
            .store
            .create_token(NewOneTimeToken {
                user_id,
                token: generate_secure_token(TOKEN_ENTROPY_BYTES),
                purpose,
                expires_at,
            })
            .await?;
        debug!("Issued {} token for user {}", purpose, user_id);
        Ok(token)
    }

    /// Mark a token used and return it. `None` when it is unknown, used,
    /// expired, or issued for another purpose.
    pub async fn consume_email_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> AuthResult<Option<OneTimeToken>> {
        Ok(self.store.consume_token(token, purpose, Utc::now()).await?)
    }

    // ============================================================================
    // Account flows
    // ============================================================================

    /// Register, then issue and send an email verification token
    pub async fn register_and_send_verification(
        &self,
        email: &str,
        password: &str,
        meta: &ClientMeta,
    ) -> AuthResult<User> {
        let user = self.register(email, password).await?;
        self.send_verification(&user).await?;
        self.audit
            .record(AuditAction::Register, Some(user.id), meta)
            .await?;
        Ok(user)
    }

    /// [`AuthService::login`] plus an audit record
    pub async fn login_with_meta(
        &self,
        email: &str,
        password: &str,
        meta: &ClientMeta,
    ) -> AuthResult<IssuedSession> {
        let issued = self.login(email, password, meta).await?;
        self.audit
            .record(AuditAction::Login, Some(issued.session.user_id), meta)
            .await?;
        Ok(issued)
    }

    /// Exchange a refresh token for a new token pair, revoking its session
    pub async fn refresh(&self, refresh_token: &str, meta: &ClientMeta) -> AuthResult<IssuedSession> {
        let claims = self.codec.decode_as(refresh_token, TokenType::Refresh)?;
        let user_id = claims.user_id().ok_or(AuthError::InvalidToken)?;
        let session_id = claims.sid.ok_or(AuthError::InvalidToken)?;

        let issued = self.rotate_refresh(user_id, session_id, meta).await?;
        self.audit
            .record(AuditAction::Refresh, Some(user_id), meta)
            .await?;
        Ok(issued)
    }

    /// Best-effort logout: revokes the session behind a valid refresh token,
    /// ignores anything else
    pub async fn logout(&self, refresh_token: Option<&str>, meta: &ClientMeta) -> AuthResult<()> {
        let mut user_id = None;

        let target = refresh_token
            .and_then(|token| self.codec.decode_as(token, TokenType::Refresh).ok())
            .and_then(|claims| Some((claims.user_id()?, claims.sid?)));

        if let Some((owner, session_id)) = target {
            if self
                .store
                .revoke_session(owner, session_id, Utc::now())
                .await?
            {
                info!("User {} logged out of session {}", owner, session_id);
                user_id = Some(owner);
            }
        }

        self.audit.record(AuditAction::Logout, user_id, meta).await?;
        Ok(())
    }

    /// Validate an access token and return its user id
    pub fn authenticate_access(&self, access_token: &str) -> AuthResult<i64> {
        let claims = self.codec.decode_as(access_token, TokenType::Access)?;
        claims.user_id().ok_or(AuthError::InvalidToken)
    }

    pub async fn current_user(&self, user_id: i64) -> AuthResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .map(User::from)
            .ok_or(AuthError::UserNotFound)
    }

    /// Issue and send another verification token
    pub async fn resend_verification(&self, user_id: i64) -> AuthResult<()> {
        let user = self.current_user(user_id).await?;
        self.send_verification(&user).await
    }

    /// Consume a verification token and mark its owner verified
    pub async fn verify_email(&self, token: &str, meta: &ClientMeta) -> AuthResult<User> {
        let consumed = self
            .store
            .consume_token_and_verify_email(token, Utc::now())
            .await
            .map_err(not_found_as_user)?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        self.audit
            .record(AuditAction::Verify, Some(consumed.user_id), meta)
            .await?;

        info!("User {} verified their email", consumed.user_id);
        self.current_user(consumed.user_id).await
    }

    /// Start a password reset. The result never reveals whether the email
    /// belongs to an account.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<&'static str> {
        let email = normalize_email(email);
        match self.store.find_user_by_email(&email).await? {
            Some(user) => {
                let expires_at = Utc::now() + self.config.password_reset_token_ttl();
                let token = self
                    .request_email_token(user.id, TokenPurpose::ResetPassword, expires_at)
                    .await?;
                if let Err(e) = self.email.send_password_reset(&user.email, &token.token).await {
                    warn!("Password reset email for user {} not delivered: {}", user.id, e);
                }
            }
            None => debug!("Password reset requested for unknown email"),
        }
        Ok(PASSWORD_RESET_REQUESTED)
    }

    /// Consume a reset token and store a new password hash
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        meta: &ClientMeta,
    ) -> AuthResult<()> {
        // Checked first so a rejected password does not burn the token
        if !validate_password(new_password) {
            return Err(AuthError::Validation(messages::INVALID_PASSWORD.to_string()));
        }

        let password_hash = self.hasher.hash(new_password)?;
        let consumed = self
            .store
            .consume_token_and_set_password(token, &password_hash, Utc::now())
            .await
            .map_err(not_found_as_user)?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        self.audit
            .record(AuditAction::Reset, Some(consumed.user_id), meta)
            .await?;

        info!("User {} reset their password", consumed.user_id);
        Ok(())
    }

    /// All sessions of a user, newest first
    pub async fn list_sessions(&self, user_id: i64) -> AuthResult<Vec<Session>> {
        Ok(self.store.list_sessions(user_id).await?)
    }

    /// Revoke one of the caller's own sessions. Revoking an already revoked
    /// session succeeds.
    pub async fn revoke_session(
        &self,
        user_id: i64,
        session_id: i64,
        meta: &ClientMeta,
    ) -> AuthResult<()> {
        if !self
            .store
            .revoke_session(user_id, session_id, Utc::now())
            .await?
        {
            return Err(AuthError::InvalidSession);
        }

        self.audit
            .record(AuditAction::SessionRevoke, Some(user_id), meta)
            .await?;
        info!("User {} revoked session {}", user_id, session_id);
        Ok(())
    }

    async fn send_verification(&self, user: &User) -> AuthResult<()> {
        let expires_at = Utc::now() + self.config.email_token_ttl();
        let token = self
            .request_email_token(user.id, TokenPurpose::VerifyEmail, expires_at)
            .await?;

        // The token stays valid even if delivery fails
        if let Err(e) = self.email.send_verification(&user.email, &token.token).await {
            warn!("Verification email for user {} not delivered: {}", user.id, e);
        }
        Ok(())
    }
}

fn not_found_as_user(err: StoreError) -> AuthError {
    match err {
        StoreError::NotFound(_) => AuthError::UserNotFound,
        other => AuthError::Store(other),
    }
}

//! One-Time Token Model
//!
//! Single-use opaque tokens for email verification and password reset.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a one-time token may be spent on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    VerifyEmail,
    ResetPassword,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify_email",
            Self::ResetPassword => "reset_password",
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verify_email" => Ok(Self::VerifyEmail),
            "reset_password" => Ok(Self::ResetPassword),
            other => Err(format!("unknown token purpose: {}", other)),
        }
    }
}

/// Persisted one-time token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneTimeToken {
    pub id: i64,
    pub user_id: i64,
    /// Opaque random string, unique across all purposes
    pub token: String,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl OneTimeToken {
    /// Check if the token has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether a consumption attempt at `now` may succeed
    pub fn is_consumable_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired_at(now)
    }
}

/// Insert payload for a new one-time token
#[derive(Debug, Clone)]
pub struct NewOneTimeToken {
    pub user_id: i64,
    pub token: String,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
}

/// Row shape for database queries, purpose stored as text
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OneTimeTokenRow {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub purpose: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl TryFrom<OneTimeTokenRow> for OneTimeToken {
    type Error = String;

    fn try_from(row: OneTimeTokenRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            token: row.token,
            purpose: row.purpose.parse()?,
            expires_at: row.expires_at,
            used: row.used,
        })
    }
}

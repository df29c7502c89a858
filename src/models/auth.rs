//! Authentication Models
//!
//! Data structures for bearer tokens and issued sessions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::session::Session;

/// Kind of bearer token, carried in the `type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims shared by access and refresh tokens
///
/// Wire shape: `{sub, type, iat, exp, sid?}`. `sid` is present only on refresh
/// tokens and names the session that backs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - user ID as a decimal string
    pub sub: String,

    /// Token type
    #[serde(rename = "type")]
    pub token_type: TokenType,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Session ID, refresh tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<i64>,
}

impl Claims {
    /// Parse the subject back into a user id
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// Result of creating a session: fresh tokens plus the stored session row
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    pub refresh_token: String,
    pub session: Session,
}

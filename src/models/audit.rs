//! Audit Log Model
//!
//! Immutable records of security-relevant actions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Security actions recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Register,
    Login,
    Logout,
    Refresh,
    Verify,
    Reset,
    SessionRevoke,
}

impl AuditAction {
    /// String representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Refresh => "refresh",
            Self::Verify => "verify",
            Self::Reset => "reset",
            Self::SessionRevoke => "session_revoke",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(Self::Register),
            "login" => Ok(Self::Login),
            "logout" => Ok(Self::Logout),
            "refresh" => Ok(Self::Refresh),
            "verify" => Ok(Self::Verify),
            "reset" => Ok(Self::Reset),
            "session_revoke" => Ok(Self::SessionRevoke),
            other => Err(format!("unknown audit action: {}", other)),
        }
    }
}

/// Stored audit record. There is no update or delete path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action: AuditAction,
    pub ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

/// Audit entry before it is appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub user_id: Option<i64>,
    pub action: AuditAction,
    pub ip: String,
    pub user_agent: String,
}

impl NewAuditEntry {
    /// Create a new audit entry with unknown client metadata
    pub fn new(action: AuditAction) -> Self {
        Self {
            user_id: None,
            action,
            ip: String::new(),
            user_agent: String::new(),
        }
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_client(mut self, meta: &ClientMeta) -> Self {
        self.ip = meta.ip.clone();
        self.user_agent = meta.user_agent.clone();
        self
    }
}

/// Caller-supplied request metadata attached to sessions and audit records
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientMeta {
    pub ip: String,
    pub user_agent: String,
}

impl ClientMeta {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Row shape for database queries, action stored as text
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AuditLogRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AuditLogRow> for AuditLogEntry {
    type Error = String;

    fn try_from(row: AuditLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            action: row.action.parse()?,
            ip: row.ip,
            user_agent: row.user_agent,
            created_at: row.created_at,
        })
    }
}

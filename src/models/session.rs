//! Session Model
//!
//! One row per issued refresh lineage link. Rotation revokes the current row and
//! inserts a successor, so a user's sessions form a chain rather than one mutated row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session. `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Revoked,
}

/// Persisted refresh session
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Session {
    /// Unique identifier, embedded as `sid` in refresh tokens
    pub id: i64,

    /// Owning user
    pub user_id: i64,

    /// SHA-256 hex of the random refresh secret; the secret itself is never stored
    pub refresh_token_hash: String,

    /// Originating client IP
    pub ip: String,

    /// Originating client user agent
    pub user_agent: String,

    /// Keyed hash of ip and user agent
    pub device_fingerprint: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set once, when the session is rotated away or revoked
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        if self.revoked_at.is_some() {
            SessionState::Revoked
        } else {
            SessionState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }
}

/// Insert payload for a new session row
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub refresh_token_hash: String,
    pub ip: String,
    pub user_agent: String,
    pub device_fingerprint: String,
}

/// Session view returned by the sessions API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub ip: String,
    pub user_agent: String,
    pub state: SessionState,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        let state = session.state();
        Self {
            id: session.id,
            created_at: session.created_at,
            updated_at: session.updated_at,
            revoked_at: session.revoked_at,
            ip: session.ip,
            user_agent: session.user_agent,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_session() -> Session {
        let now = Utc::now();
        Session {
            id: 1,
            user_id: 10,
            refresh_token_hash: "abc".to_string(),
            ip: "127.0.0.1".to_string(),
            user_agent: "curl/8.0".to_string(),
            device_fingerprint: "fp".to_string(),
            created_at: now,
            updated_at: now,
            revoked_at: None,
        }
    }

    #[test]
    fn test_session_state() {
        let mut session = create_test_session();
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.is_active());

        session.revoked_at = Some(Utc::now());
        assert_eq!(session.state(), SessionState::Revoked);
        assert!(!session.is_active());
    }

    #[test]
    fn test_session_response_omits_secret_hash() {
        let response = SessionResponse::from(create_test_session());
        let json = serde_json::to_value(&response).unwrap();

        assert!(json.get("refresh_token_hash").is_none());
        assert!(json.get("device_fingerprint").is_none());
        assert_eq!(json["state"], "active");
    }
}

//! User Model
//!
//! Core user and role data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User representation for external API responses
///
/// This struct represents an account without sensitive information like password hashes.
/// All datetime fields use UTC timezone for consistency across different deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier for the user
    pub id: i64,

    /// User's email address (unique, normalized)
    pub email: String,

    /// Whether the account may sign in
    pub is_active: bool,

    /// Whether the user's email address has been verified
    pub is_email_verified: bool,

    /// Optional role label reference
    pub role_id: Option<i64>,

    /// Timestamp when the account was created
    pub created_at: DateTime<Utc>,

    /// Timestamp when the account was last modified
    pub updated_at: DateTime<Utc>,
}

/// Internal user representation including password hash
///
/// Returned by the user store for credential checks. It is never exposed in
/// API responses; convert it into [`User`] before handing it out.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserWithPassword {
    pub id: i64,
    pub email: String,
    /// Self-describing argon2 hash
    pub password_hash: String,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub role_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserWithPassword> for User {
    /// Strips the password hash so it can't leak into responses.
    fn from(user_with_password: UserWithPassword) -> Self {
        User {
            id: user_with_password.id,
            email: user_with_password.email,
            is_active: user_with_password.is_active,
            is_email_verified: user_with_password.is_email_verified,
            role_id: user_with_password.role_id,
            created_at: user_with_password.created_at,
            updated_at: user_with_password.updated_at,
        }
    }
}

/// Named role label referenced by users
///
/// Stored only; authorization policy lives outside this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_with_password_conversion() {
        let user_with_password = UserWithPassword {
            id: 7,
            email: "test@example.com".to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            is_active: true,
            is_email_verified: false,
            role_id: Some(2),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let user: User = user_with_password.into();

        assert_eq!(user.id, 7);
        assert_eq!(user.email, "test@example.com");
        assert!(user.is_active);
        assert!(!user.is_email_verified);
        assert_eq!(user.role_id, Some(2));
    }

    #[test]
    fn test_user_serialization_has_no_hash() {
        let user = User {
            id: 1,
            email: "a@example.com".to_string(),
            is_active: true,
            is_email_verified: true,
            role_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "a@example.com");
    }
}

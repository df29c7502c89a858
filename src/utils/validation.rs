//! Validation Utilities
//!
//! Input validation functions for credentials and API requests.

use regex::Regex;
use std::sync::OnceLock;
use validator::ValidationError;

/// Minimum accepted password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum accepted password length
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Validates email address format
pub fn validate_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    regex.is_match(email.trim()) && email.len() <= 255
}

/// Normalizes email address to lowercase and removes whitespace
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Checks password length bounds
pub fn validate_password(password: &str) -> bool {
    let len = password.chars().count();
    (MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&len)
}

/// Custom validator for email fields using the validator crate
pub fn email_validator(email: &str) -> Result<(), ValidationError> {
    if validate_email(email) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_email").with_message(messages::INVALID_EMAIL.into()))
    }
}

/// Custom validator for password fields using the validator crate
pub fn password_validator(password: &str) -> Result<(), ValidationError> {
    if validate_password(password) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_password")
            .with_message(messages::INVALID_PASSWORD.into()))
    }
}

/// Validation error messages for user-friendly responses
pub mod messages {
    pub const INVALID_EMAIL: &str = "Please enter a valid email address";
    pub const INVALID_PASSWORD: &str = "Password must be between 8 and 128 characters";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("test.user+tag@domain.co.uk"));
        assert!(!validate_email("invalid.email"));
        assert!(!validate_email("@domain.com"));
        assert!(!validate_email("user@"));
        assert!(!validate_email(""));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  USER@EXAMPLE.COM  "), "user@example.com");
        assert_eq!(normalize_email("Test@Domain.org"), "test@domain.org");
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("pw123456"));
        assert!(!validate_password("short"));
        assert!(!validate_password(&"a".repeat(129)));
        assert!(validate_password(&"a".repeat(128)));
    }

    #[test]
    fn test_validator_functions() {
        assert!(email_validator("a@example.com").is_ok());
        assert_eq!(
            email_validator("nope").unwrap_err().code,
            "invalid_email"
        );
        assert!(password_validator("pw123456").is_ok());
        assert_eq!(
            password_validator("pw").unwrap_err().code,
            "invalid_password"
        );
    }
}

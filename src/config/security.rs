//! Security Configuration
//!
//! Token signing, token lifetimes, and login rate limiting settings.

use chrono::Duration;

use super::{env, ConfigError};

/// Token signing and lifetime settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC key for JWT signatures and device fingerprints
    pub secret_key: String,

    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,

    /// Lifetime of email verification tokens
    pub email_token_expire_hours: i64,

    pub password_reset_token_expire_hours: i64,
}

impl AuthConfig {
    /// Settings with the default lifetimes
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            access_token_expire_minutes: 15,
            refresh_token_expire_days: 30,
            email_token_expire_hours: 24,
            password_reset_token_expire_hours: 2,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::new(env::get_required("SECRET_KEY")?);
        Ok(Self {
            access_token_expire_minutes: env::get_i64(
                "ACCESS_TOKEN_EXPIRE_MINUTES",
                defaults.access_token_expire_minutes,
            ),
            refresh_token_expire_days: env::get_i64(
                "REFRESH_TOKEN_EXPIRE_DAYS",
                defaults.refresh_token_expire_days,
            ),
            email_token_expire_hours: env::get_i64(
                "EMAIL_TOKEN_EXPIRE_HOURS",
                defaults.email_token_expire_hours,
            ),
            password_reset_token_expire_hours: env::get_i64(
                "PASSWORD_RESET_TOKEN_EXPIRE_HOURS",
                defaults.password_reset_token_expire_hours,
            ),
            ..defaults
        })
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::minutes(self.access_token_expire_minutes)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::days(self.refresh_token_expire_days)
    }

    pub fn email_token_ttl(&self) -> Duration {
        Duration::hours(self.email_token_expire_hours)
    }

    pub fn password_reset_token_ttl(&self) -> Duration {
        Duration::hours(self.password_reset_token_expire_hours)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "SECRET_KEY cannot be empty".to_string(),
            ));
        }

        let lifetimes = [
            ("ACCESS_TOKEN_EXPIRE_MINUTES", self.access_token_expire_minutes),
            ("REFRESH_TOKEN_EXPIRE_DAYS", self.refresh_token_expire_days),
            ("EMAIL_TOKEN_EXPIRE_HOURS", self.email_token_expire_hours),
            (
                "PASSWORD_RESET_TOKEN_EXPIRE_HOURS",
                self.password_reset_token_expire_hours,
            ),
        ];
        for (key, value) in lifetimes {
            if value <= 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Backing store for rate limit counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitStore {
    Redis { url: String },
    Memory,
}

/// Login rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitingConfig {
    /// Attempts allowed per key and window
    pub login_limit: u64,
    pub login_window_seconds: u64,
    pub store: RateLimitStore,

    /// Upper bound on a single shared-store call
    pub store_timeout_ms: u64,

    /// Interval between sweeps of stale in-process windows
    pub sweep_interval_seconds: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            login_limit: 5,
            login_window_seconds: 60,
            store: RateLimitStore::Memory,
            store_timeout_ms: 250,
            sweep_interval_seconds: 300,
        }
    }
}

impl RateLimitingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let store = match env::get_optional("REDIS_URL") {
            Some(url) => RateLimitStore::Redis { url },
            None => RateLimitStore::Memory,
        };

        Self {
            login_limit: env::get_u64("LOGIN_RATE_LIMIT", defaults.login_limit),
            login_window_seconds: env::get_u64(
                "LOGIN_RATE_WINDOW_SECONDS",
                defaults.login_window_seconds,
            ),
            store,
            store_timeout_ms: env::get_u64("RATE_LIMIT_STORE_TIMEOUT_MS", defaults.store_timeout_ms),
            sweep_interval_seconds: env::get_u64(
                "RATE_LIMIT_SWEEP_SECONDS",
                defaults.sweep_interval_seconds,
            ),
        }
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.login_limit == 0 {
            return Err(ConfigError::ValidationError(
                "Login rate limit must be greater than 0".to_string(),
            ));
        }
        if self.login_window_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "Login rate window must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "Rate limit sweep interval must be greater than 0".to_string(),
            ));
        }
        if let RateLimitStore::Redis { url } = &self.store {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "REDIS_URL".to_string(),
                    value: url.clone(),
                    reason: "cannot be blank".to_string(),
                });
            }
        }
        Ok(())
    }
}

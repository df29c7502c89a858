//! Configuration Module
//!
//! Immutable configuration built once from the environment at startup and
//! passed to each component's constructor.

pub mod security;

use thiserror::Error;

pub use crate::database::DatabaseConfig;
pub use security::{AuthConfig, RateLimitStore, RateLimitingConfig};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {value} - {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Environment variable helpers
pub mod env {
    use std::env;

    use super::ConfigError;

    /// Get environment variable as string with default
    pub fn get_string(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get a non-empty environment variable, if set
    pub fn get_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    /// Get environment variable as u16 with default
    pub fn get_u16(key: &str, default: u16) -> u16 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u32 with default
    pub fn get_u32(key: &str, default: u32) -> u32 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u64 with default
    pub fn get_u64(key: &str, default: u64) -> u64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as i64 with default
    pub fn get_i64(key: &str, default: i64) -> i64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Check if environment variable is set
    pub fn is_set(key: &str) -> bool {
        env::var(key).is_ok()
    }

    /// Get required environment variable
    pub fn get_required(key: &str) -> Result<String, ConfigError> {
        env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
    }
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::get_string("SERVER_HOST", &defaults.host),
            port: env::get_u16("SERVER_PORT", defaults.port),
            cors_origins: env::get_string("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// SMTP settings for outbound mail
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_name: String,
    pub from_email: String,

    /// Base URL used to build links in emails
    pub app_base_url: String,
}

impl EmailConfig {
    /// `None` unless `SMTP_HOST` is set
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        if !env::is_set("SMTP_HOST") {
            return Ok(None);
        }

        Ok(Some(Self {
            smtp_host: env::get_required("SMTP_HOST")?,
            smtp_port: env::get_u16("SMTP_PORT", 587),
            smtp_username: env::get_required("SMTP_USERNAME")?,
            smtp_password: env::get_required("SMTP_PASSWORD")?,
            from_name: env::get_string("SMTP_FROM_NAME", "Auth Service"),
            from_email: env::get_required("SMTP_FROM_EMAIL")?,
            app_base_url: env::get_string("APP_BASE_URL", "http://localhost:8000"),
        }))
    }
}

/// Application configuration combining all service configurations
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub rate_limiting: RateLimitingConfig,
    pub email: Option<EmailConfig>,
}

impl AppConfig {
    /// Load complete application configuration from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            server: ServerConfig::from_env(),
            database: DatabaseConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            rate_limiting: RateLimitingConfig::from_env(),
            email: EmailConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the complete configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()?;
        self.rate_limiting.validate()?;

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::ValidationError(
                "Database min_connections cannot be greater than max_connections".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::new("test-secret"),
            rate_limiting: RateLimitingConfig::default(),
            email: None,
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
    }

    #[test]
    fn test_env_helpers() {
        assert_eq!(env::get_u32("AUTH_SERVICE_NONEXISTENT_U32", 42), 42);
        assert_eq!(
            env::get_string("AUTH_SERVICE_NONEXISTENT_STRING", "default"),
            "default"
        );
        assert!(env::get_optional("AUTH_SERVICE_NONEXISTENT_STRING").is_none());
        assert!(matches!(
            env::get_required("AUTH_SERVICE_NONEXISTENT_STRING"),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_app_config_validation() {
        assert!(create_test_config().validate().is_ok());

        let mut config = create_test_config();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = create_test_config();
        config.database.min_connections = config.database.max_connections + 1;
        assert!(config.validate().is_err());

        let mut config = create_test_config();
        config.rate_limiting.login_limit = 0;
        assert!(config.validate().is_err());
    }
}

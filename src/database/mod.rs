//! Database Module
//!
//! PostgreSQL pool setup and schema migrations.

pub mod connection;

// Re-export commonly used types
pub use connection::{run_migrations, DatabaseConfig, DatabasePool};

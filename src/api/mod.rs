//! API Layer
//!
//! HTTP endpoints and request handling for the auth service.

pub mod handlers;
pub mod middleware;
pub mod routes;

// Re-export commonly used types
pub use handlers::{login_rate_limit_key, AppState, SuccessResponse};
pub use middleware::{bearer_token, AuthUser, UNKNOWN_CLIENT_IP};
pub use routes::{create_minimal_routes, create_routes, RouterBuilder};

//! Auth Service Server
//!
//! HTTP server exposing every auth endpoint over the PostgreSQL store. Login
//! throttling uses Redis when `REDIS_URL` is set and per-process counters
//! otherwise.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use chrono::Utc;
use dotenv::dotenv;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth_service::{
    api::{AppState, RouterBuilder},
    config::{AppConfig, RateLimitStore, RateLimitingConfig, ServerConfig},
    database::run_migrations,
    service::{
        AuthService, EmailSender, LogEmailSender, RateLimiter, RedisCounterStore, SmtpEmailSender,
    },
    store::PgStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenv().ok();
    env_logger::init();

    log::info!("Starting auth service v{}", auth_service::VERSION);

    let config = AppConfig::from_env().context("loading configuration")?;
    log::info!("Configuration loaded and validated");

    let pool = config
        .database
        .create_pool()
        .await
        .context("connecting to PostgreSQL")?;

    log::info!("Running database migrations...");
    run_migrations(&pool).await.context("running migrations")?;

    let email: Arc<dyn EmailSender> = match &config.email {
        Some(email_config) => {
            log::info!("SMTP delivery via {}", email_config.smtp_host);
            Arc::new(SmtpEmailSender::new(
                email_config.clone(),
                config.auth.email_token_expire_hours,
                config.auth.password_reset_token_expire_hours,
            )?)
        }
        None => {
            log::warn!("SMTP_HOST not set, email tokens will only be logged");
            Arc::new(LogEmailSender)
        }
    };

    let auth_service = Arc::new(AuthService::new(
        Arc::new(PgStore::new(pool)),
        config.auth.clone(),
        email,
    ));

    let rate_limiter = Arc::new(build_rate_limiter(&config.rate_limiting).await);
    log::info!(
        "Login rate limit: {} attempts per {}s ({})",
        config.rate_limiting.login_limit,
        config.rate_limiting.login_window_seconds,
        if rate_limiter.has_shared_store() {
            "redis"
        } else {
            "in-process"
        }
    );
    spawn_window_sweeper(rate_limiter.clone(), &config.rate_limiting);

    let state = AppState::new(auth_service, rate_limiter, config.rate_limiting.clone());

    let app = RouterBuilder::with_all_routes()
        .build()
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config.server))
                .into_inner(),
        );

    let bind_addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    log::info!("Listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn build_rate_limiter(config: &RateLimitingConfig) -> RateLimiter {
    match &config.store {
        RateLimitStore::Redis { url } => match RedisCounterStore::connect(url).await {
            Ok(store) => RateLimiter::with_store(Arc::new(store), config.store_timeout()),
            Err(e) => {
                log::warn!("Redis unavailable ({}), using in-process rate limiting", e);
                RateLimiter::in_memory()
            }
        },
        RateLimitStore::Memory => RateLimiter::in_memory(),
    }
}

/// Periodically drop fallback counters from finished windows
fn spawn_window_sweeper(rate_limiter: Arc<RateLimiter>, config: &RateLimitingConfig) {
    let window_seconds = config.login_window_seconds;
    let period = Duration::from_secs(config.sweep_interval_seconds);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = rate_limiter.sweep_stale_windows(Utc::now().timestamp(), window_seconds);
            if removed > 0 {
                log::debug!("Swept {} stale rate limit windows", removed);
            }
        }
    });
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

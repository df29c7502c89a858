//! Rate Limiting Service
//!
//! Fixed-window request counter keyed by `(key, now / window)`. A shared
//! counter store (Redis) is used when configured; any error or timeout from
//! it falls back to a per-process counter for that call. Callers are never
//! blocked by limiter failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use serde::Serialize;
use thiserror::Error;

/// Errors from the shared counter store. Never surfaced to limiter callers.
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Counter store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for counter store operations
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Outcome of a single limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Zero when allowed
    pub retry_after_seconds: u64,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: 0,
        }
    }

    pub fn deny(retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            retry_after_seconds,
        }
    }
}

/// Shared counter store with an atomic increment-and-expire primitive
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one, (re)set its expiry, and return the new count
    async fn incr_with_expiry(&self, key: &str, ttl_seconds: u64) -> RateLimitResult<u64>;
}

/// Redis-backed counter store over a reconnecting multiplexed connection
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> RateLimitResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl_seconds: u64) -> RateLimitResult<u64> {
        let mut connection = self.connection.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, ttl_seconds as i64)
            .ignore()
            .query_async(&mut connection)
            .await?;
        Ok(count)
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    first_seen: i64,
}

/// Fixed-window rate limiter with an in-process fallback
pub struct RateLimiter {
    shared: Option<Arc<dyn CounterStore>>,
    store_timeout: Duration,
    buckets: Mutex<HashMap<(String, i64), Bucket>>,
}

impl RateLimiter {
    /// Limiter that only ever uses the in-process counters
    pub fn in_memory() -> Self {
        Self {
            shared: None,
            store_timeout: Duration::from_millis(250),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter that prefers `store`, bounding each call by `store_timeout`
    pub fn with_store(store: Arc<dyn CounterStore>, store_timeout: Duration) -> Self {
        Self {
            shared: Some(store),
            store_timeout,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_shared_store(&self) -> bool {
        self.shared.is_some()
    }

    /// Count one event for `key` and decide whether it is within `limit`
    pub async fn is_allowed(&self, key: &str, limit: u64, window_seconds: u64) -> RateLimitDecision {
        self.check_at(key, limit, window_seconds, Utc::now().timestamp())
            .await
    }

    /// [`RateLimiter::is_allowed`] with an explicit unix time
    pub async fn check_at(
        &self,
        key: &str,
        limit: u64,
        window_seconds: u64,
        now: i64,
    ) -> RateLimitDecision {
        let window = window_seconds.max(1) as i64;
        let window_index = now.div_euclid(window);

        if let Some(store) = &self.shared {
            let shared_key = format!("rl:{}:{}", key, window_index);
            match tokio::time::timeout(
                self.store_timeout,
                store.incr_with_expiry(&shared_key, window as u64),
            )
            .await
            {
                Ok(Ok(count)) => {
                    if count > limit {
                        return RateLimitDecision::deny((window - now.rem_euclid(window)) as u64);
                    }
                    return RateLimitDecision::allow();
                }
                Ok(Err(e)) => {
                    log::debug!("Counter store failed, using in-process limiter: {}", e);
                }
                Err(_) => {
                    log::debug!(
                        "Counter store timed out after {:?}, using in-process limiter",
                        self.store_timeout
                    );
                }
            }
        }

        self.check_local(key, limit, window, window_index, now)
    }

    fn check_local(
        &self,
        key: &str,
        limit: u64,
        window: i64,
        window_index: i64,
        now: i64,
    ) -> RateLimitDecision {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets
            .entry((key.to_string(), window_index))
            .or_insert(Bucket {
                count: 0,
                first_seen: now,
            });
        bucket.count += 1;

        if bucket.count > limit {
            let remaining = (window - (now - bucket.first_seen)).max(0);
            return RateLimitDecision::deny(remaining as u64);
        }
        RateLimitDecision::allow()
    }

    /// Drop in-process buckets from windows that ended before `now`.
    /// Returns the number of buckets removed.
    pub fn sweep_stale_windows(&self, now: i64, window_seconds: u64) -> usize {
        let window = window_seconds.max(1) as i64;
        let current = now.div_euclid(window);

        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let before = buckets.len();
        buckets.retain(|(_, window_index), _| *window_index >= current);
        before - buckets.len()
    }

    /// Number of live in-process buckets
    pub fn local_bucket_count(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn incr_with_expiry(&self, _key: &str, _ttl: u64) -> RateLimitResult<u64> {
            Err(RateLimitError::Unavailable("connection refused".to_string()))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl CounterStore for SlowStore {
        async fn incr_with_expiry(&self, _key: &str, _ttl: u64) -> RateLimitResult<u64> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        }
    }

    #[derive(Default)]
    struct CountingStore {
        count: AtomicU64,
    }

    #[async_trait]
    impl CounterStore for CountingStore {
        async fn incr_with_expiry(&self, _key: &str, _ttl: u64) -> RateLimitResult<u64> {
            Ok(self.count.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    // ============================================================================
    // In-process counters
    // ============================================================================

    #[tokio::test]
    async fn test_limit_then_deny_then_next_window() {
        let limiter = RateLimiter::in_memory();
        let now = 1_700_000_010;

        for _ in 0..5 {
            assert!(limiter.check_at("login:a@example.com:1.2.3.4", 5, 60, now).await.allowed);
        }

        let denied = limiter.check_at("login:a@example.com:1.2.3.4", 5, 60, now + 5).await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_seconds, 55);

        let next_window = now - now % 60 + 60;
        let reset = limiter.check_at("login:a@example.com:1.2.3.4", 5, 60, next_window).await;
        assert!(reset.allowed);
        assert_eq!(reset.retry_after_seconds, 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::in_memory();
        let now = 1_700_000_000;

        assert!(limiter.check_at("a", 1, 60, now).await.allowed);
        assert!(!limiter.check_at("a", 1, 60, now).await.allowed);
        assert!(limiter.check_at("b", 1, 60, now).await.allowed);
    }

    #[tokio::test]
    async fn test_local_retry_after_counts_from_first_hit() {
        let limiter = RateLimiter::in_memory();
        let window_start = 1_700_000_040; // divisible by 60

        assert!(limiter.check_at("k", 1, 60, window_start).await.allowed);
        let denied = limiter.check_at("k", 1, 60, window_start + 59).await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_seconds, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let limiter = Arc::new(RateLimiter::in_memory());
        let now = 1_700_000_000;

        let mut handles = Vec::new();
        for _ in 0..200 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check_at("burst", 10, 60, now).await.allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
        assert!(!limiter.check_at("burst", 10, 60, now).await.allowed);
    }

    #[tokio::test]
    async fn test_sweep_drops_old_windows() {
        let limiter = RateLimiter::in_memory();
        let now = 1_700_000_000;

        limiter.check_at("a", 5, 60, now - 120).await;
        limiter.check_at("b", 5, 60, now - 60).await;
        limiter.check_at("c", 5, 60, now).await;
        assert_eq!(limiter.local_bucket_count(), 3);

        assert_eq!(limiter.sweep_stale_windows(now, 60), 2);
        assert_eq!(limiter.local_bucket_count(), 1);
    }

    // ============================================================================
    // Shared store
    // ============================================================================

    #[tokio::test]
    async fn test_shared_store_retry_uses_window_boundary() {
        let limiter =
            RateLimiter::with_store(Arc::new(CountingStore::default()), Duration::from_millis(250));
        let now = 1_700_000_010;

        for _ in 0..5 {
            assert!(limiter.check_at("k", 5, 60, now).await.allowed);
        }
        let denied = limiter.check_at("k", 5, 60, now + 20).await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_seconds, 60 - (now + 20) as u64 % 60);
        assert_eq!(limiter.local_bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_store_falls_back() {
        let limiter = RateLimiter::with_store(Arc::new(FailingStore), Duration::from_millis(250));
        let now = 1_700_000_000;

        assert!(limiter.check_at("k", 1, 60, now).await.allowed);
        assert!(!limiter.check_at("k", 1, 60, now).await.allowed);
        assert_eq!(limiter.local_bucket_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out_and_falls_back() {
        let limiter = RateLimiter::with_store(Arc::new(SlowStore), Duration::from_millis(250));

        let decision = limiter.check_at("k", 5, 60, 1_700_000_000).await;
        assert!(decision.allowed);
        assert_eq!(limiter.local_bucket_count(), 1);
    }
}

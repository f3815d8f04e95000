//! # Request Limiters
//!
//! Platform request budgets shared by every worker through the `int-global`
//! cache namespace. [`RateLimiter`] counts requests in a fixed window and
//! answers with [`ProcessorError::RateLimit`] once the window is spent, so the
//! run pauses exactly as it would for a platform-reported limit.
//! [`ConcurrentRequestLimiter`] caps in-flight requests and waits for a free
//! slot.
//!
//! ```rust
//! use integration_stream::cache::{MemoryCache, NamespacedCache};
//! use integration_stream::orchestration::limiter::RateLimiter;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let cache = NamespacedCache::global(Arc::new(MemoryCache::new()), Duration::from_secs(60));
//! let limiter = RateLimiter::new(cache, 1, 60, "github-search");
//!
//! assert!(limiter.check_rate_limit().await.is_ok());
//! assert!(limiter.check_rate_limit().await.is_err());
//! # });
//! ```

use super::processor::ProcessorError;
use crate::cache::NamespacedCache;
use crate::constants::system;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fixed-window request counter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    cache: NamespacedCache,
    max_requests: i64,
    window: Duration,
    counter_key: String,
}

impl RateLimiter {
    pub fn new(
        cache: NamespacedCache,
        max_requests: u32,
        window_seconds: u64,
        counter_key: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            max_requests: i64::from(max_requests),
            window: Duration::from_secs(window_seconds.max(1)),
            counter_key: counter_key.into(),
        }
    }

    pub fn counter_key(&self) -> &str {
        &self.counter_key
    }

    /// Count one request against the current window. Fails with a rate limit
    /// that resets when the window does.
    pub async fn check_rate_limit(&self) -> Result<(), ProcessorError> {
        let count = self
            .cache
            .increment(&self.counter_key, 1, self.window)
            .await
            .map_err(|e| {
                ProcessorError::failed(format!("rate limiter {}: {e}", self.counter_key))
            })?;

        if count > self.max_requests {
            let reset_seconds = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
            warn!(
                counter_key = %self.counter_key,
                count,
                max_requests = self.max_requests,
                reset_seconds,
                "Request budget spent for this window"
            );
            return Err(ProcessorError::rate_limit(reset_seconds));
        }

        Ok(())
    }
}

/// Cap on requests in flight at once across all workers
#[derive(Debug, Clone)]
pub struct ConcurrentRequestLimiter {
    cache: NamespacedCache,
    max_concurrent: i64,
    counter_key: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl ConcurrentRequestLimiter {
    pub fn new(cache: NamespacedCache, max_concurrent: u32, counter_key: impl Into<String>) -> Self {
        Self {
            cache,
            max_concurrent: i64::from(max_concurrent.max(1)),
            counter_key: counter_key.into(),
            poll_interval: Duration::from_millis(system::CONCURRENT_REQUEST_POLL_INTERVAL_MS),
            max_wait: Duration::from_secs(system::CONCURRENT_REQUEST_MAX_WAIT_SECONDS),
        }
    }

    pub fn with_wait(mut self, poll_interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self
    }

    pub fn counter_key(&self) -> &str {
        &self.counter_key
    }

    /// Run `request` once a slot is free, returning the slot afterwards
    pub async fn process_with_limit<F, Fut, T>(&self, request: F) -> Result<T, ProcessorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProcessorError>>,
    {
        self.acquire().await?;
        let result = request().await;
        if let Err(err) = self.release().await {
            warn!(counter_key = %self.counter_key, error = %err, "Failed to release request slot");
        }
        result
    }

    pub async fn acquire(&self) -> Result<(), ProcessorError> {
        let started = Instant::now();
        let slot_ttl = Duration::from_secs(system::CONCURRENT_REQUEST_SLOT_TTL_SECONDS);

        loop {
            let in_flight = self.adjust(1, slot_ttl).await?;
            if in_flight <= self.max_concurrent {
                return Ok(());
            }
            self.adjust(-1, slot_ttl).await?;

            if started.elapsed() >= self.max_wait {
                warn!(
                    counter_key = %self.counter_key,
                    max_concurrent = self.max_concurrent,
                    "No request slot freed up in time"
                );
                return Err(ProcessorError::failed(format!(
                    "Max concurrent requests reached for {}",
                    self.counter_key
                )));
            }
            debug!(counter_key = %self.counter_key, in_flight, "Waiting for a request slot");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn release(&self) -> Result<(), ProcessorError> {
        self.adjust(
            -1,
            Duration::from_secs(system::CONCURRENT_REQUEST_SLOT_TTL_SECONDS),
        )
        .await
        .map(|_| ())
    }

    async fn adjust(&self, delta: i64, ttl: Duration) -> Result<i64, ProcessorError> {
        self.cache
            .increment(&self.counter_key, delta, ttl)
            .await
            .map_err(|e| {
                ProcessorError::failed(format!("concurrent request limiter {}: {e}", self.counter_key))
            })
    }
}

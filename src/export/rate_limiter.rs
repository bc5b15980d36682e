//! Per-org throttling for metadata API calls.
//!
//! This module provides the [`RateLimiter`] struct which enforces a minimum
//! interval between metadata requests against the same org, independent of
//! how the calling tasks are scheduled.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use exporter_core::export::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_millis(200)));
//!
//! // First request proceeds immediately
//! limiter.acquire("prod").await;
//!
//! // Second request to the same org waits for the interval
//! limiter.acquire("prod").await;
//!
//! // Another org proceeds immediately
//! limiter.acquire("sandbox").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Default interval between metadata requests to one org.
pub const DEFAULT_METADATA_INTERVAL: Duration = Duration::from_millis(200);

/// Warning threshold for cumulative delay per org (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Keyed minimum-interval rate limiter.
///
/// Designed to be wrapped in `Arc` and shared across Tokio tasks. Uses
/// `DashMap` for concurrent access to per-key state and `tokio::sync::Mutex`
/// for atomic read-update of the last request time.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum time between requests with the same key.
    interval: Duration,

    /// Whether rate limiting is disabled.
    disabled: bool,

    /// Per-key state. Values are `Arc` so the `DashMap` shard lock is released
    /// before awaiting on the inner mutex.
    keys: DashMap<String, Arc<KeyState>>,
}

#[derive(Debug)]
struct KeyState {
    /// `None` until the first request (which is immediate).
    last_request: Mutex<Option<Instant>>,

    cumulative_delay_ms: AtomicU64,
}

impl KeyState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a rate limiter with the given minimum interval.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = interval.as_millis()))]
    pub fn new(interval: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            interval,
            disabled: interval.is_zero(),
            keys: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
            disabled: true,
            keys: DashMap::new(),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until a request with `key` is allowed, then records it.
    ///
    /// The first request for any key proceeds immediately.
    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str) {
        if self.disabled {
            return;
        }

        let state = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyState::new()))
            .clone();

        let mut last_request_guard = state.last_request.lock().await;

        if let Some(last_request) = *last_request_guard {
            let elapsed = last_request.elapsed();

            if elapsed < self.interval {
                let delay = self.interval.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    key,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                    && cumulative.saturating_sub(delay) < CUMULATIVE_DELAY_WARNING_THRESHOLD
                {
                    warn!(
                        key,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "metadata throttling has added over 30s of waiting"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        }

        *last_request_guard = Some(Instant::now());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_new_and_disabled() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        assert!(!limiter.is_disabled());
        assert_eq!(limiter.interval(), Duration::from_millis(100));

        assert!(RateLimiter::disabled().is_disabled());
        assert!(RateLimiter::new(Duration::ZERO).is_disabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        limiter.acquire("prod").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_same_key_waits() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.acquire("prod").await;
        let start = Instant::now();
        limiter.acquire("prod").await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_do_not_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.acquire("prod").await;
        let start = Instant::now();
        limiter.acquire("sandbox").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_are_spaced() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));
        let start = Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire("prod").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}

//! Request rate limiting using a token bucket
//!
//! The RateLimiter bounds how many fetch requests all workers together may issue,
//! independently of how many are allowed in flight by the concurrency gate.

use crate::config::RateLimitConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Fixed-point scale for fractional tokens
const MICROS_PER_TOKEN: u64 = 1_000_000;

/// Global request limiter shared across all workers
///
/// # Algorithm
///
/// - Each request consumes one token
/// - Tokens refill continuously at `requests_per_minute / 60` per second
/// - The bucket holds at most `burst_size` tokens, and starts full
///
/// Token counts are kept in millionths of a token so slow rates refill smoothly.
/// State lives in atomics updated with compare-and-swap, so `acquire` never holds a lock.
#[derive(Clone)]
pub struct RateLimiter {
    /// Refill rate in micro-tokens per second (0 = unlimited)
    rate_micros: u64,
    /// Bucket capacity in micro-tokens
    capacity_micros: u64,
    /// Available micro-tokens
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since `epoch`)
    last_refill: Arc<AtomicU64>,
    epoch: Instant,
}

impl RateLimiter {
    /// Create a limiter from configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use card_dl::config::RateLimitConfig;
    /// use card_dl::rate_limiter::RateLimiter;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// // 60 requests per minute, bursts of 10
    /// let limiter = RateLimiter::new(&RateLimitConfig::default());
    /// assert!(limiter.is_limited());
    ///
    /// // Unlimited
    /// let unlimited = RateLimiter::new(&RateLimitConfig { requests_per_minute: 0, burst_size: 0 });
    /// assert!(!unlimited.is_limited());
    /// # }
    /// ```
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let rate_micros = u64::from(config.requests_per_minute) * MICROS_PER_TOKEN / 60;
        let capacity_micros = u64::from(config.burst_size.max(1)) * MICROS_PER_TOKEN;

        Self {
            rate_micros,
            capacity_micros,
            tokens: Arc::new(AtomicU64::new(capacity_micros)),
            last_refill: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
        }
    }

    /// Whether requests are actually throttled
    pub fn is_limited(&self) -> bool {
        self.rate_micros > 0
    }

    /// Wait until one request may be issued
    pub async fn acquire(&self) {
        loop {
            let rate = self.rate_micros;
            if rate == 0 {
                return;
            }

            self.refill_tokens(rate);

            let current = self.tokens.load(Ordering::SeqCst);
            if current >= MICROS_PER_TOKEN {
                if self
                    .tokens
                    .compare_exchange(
                        current,
                        current - MICROS_PER_TOKEN,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    return;
                }
                // Lost the race to another worker, re-read
                continue;
            }

            // Sleep roughly until the missing fraction of a token has refilled.
            // Capped at 1s so a very slow rate still re-checks periodically.
            let missing = MICROS_PER_TOKEN - current;
            let wait_ms = missing.saturating_mul(1000) / rate;
            tokio::time::sleep(Duration::from_millis(wait_ms.clamp(1, 1000))).await;
        }
    }

    /// Refill tokens based on elapsed time since last refill
    fn refill_tokens(&self, rate: u64) {
        let now = self.now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed_nanos = now.saturating_sub(last);

        let to_add = (u128::from(rate) * u128::from(elapsed_nanos) / 1_000_000_000) as u64;
        if to_add == 0 {
            return;
        }

        if self
            .last_refill
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let capacity = self.capacity_micros;
            let _ = self
                .tokens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                    Some(t.saturating_add(to_add).min(capacity))
                });
        }
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

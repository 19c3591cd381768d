//! Token bucket rate limiter for a single source.
//!
//! The bucket starts full and refills continuously at `refill_rate`
//! tokens per second. Refill is lazy: it is computed from the elapsed
//! clock time whenever the bucket is touched, never by a background task.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;

/// Lazily refilled token bucket.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Creates a full bucket. Negative or NaN parameters are clamped to zero.
    pub fn new(capacity: f64, refill_rate: f64, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(0.0);
        let last_refill = clock.now();
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            tokens: capacity,
            last_refill,
            clock,
        }
    }

    /// Bucket holding `requests_per_minute` tokens, refilled at `rpm / 60` per second.
    pub fn per_minute(requests_per_minute: f64, clock: Arc<dyn Clock>) -> Self {
        Self::new(requests_per_minute, requests_per_minute / 60.0, clock)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&mut self) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes `tokens` from the bucket if that many are available.
    ///
    /// Leaves the level untouched (apart from refill) when the bucket is short.
    pub fn acquire(&mut self, tokens: f64) -> bool {
        self.refill();
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Minimum wait before `acquire(tokens)` could succeed.
    ///
    /// [`Duration::MAX`] when `tokens` exceeds capacity, since no amount of
    /// waiting fills the bucket that far.
    pub fn wait_time(&mut self, tokens: f64) -> Duration {
        if tokens > self.capacity {
            return Duration::MAX;
        }
        self.refill();
        if self.tokens >= tokens {
            return Duration::ZERO;
        }
        let needed = tokens - self.tokens;
        duration_from_secs_ceil(needed / self.refill_rate)
    }

    /// Current token level after refill.
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

/// Rounds up to the next nanosecond so that waiting the returned duration
/// always refills at least the requested amount. Infinite waits saturate.
fn duration_from_secs_ceil(seconds: f64) -> Duration {
    if !seconds.is_finite() || seconds >= (u64::MAX / 1_000_000_000) as f64 {
        return Duration::MAX;
    }
    if seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((seconds * 1e9).ceil() as u64)
}

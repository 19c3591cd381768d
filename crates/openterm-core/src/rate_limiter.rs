//! Per-source rate limiting registry.
//!
//! Each registered source owns a [`TokenBucket`] behind its own mutex, so
//! sources never contend with each other. Unregistered sources are not rate
//! limited at all.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::ResilienceError;
use crate::token_bucket::TokenBucket;

type SharedBucket = Arc<Mutex<TokenBucket>>;

/// Snapshot of a source's configured limit and current budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimit {
    pub requests_per_minute: f64,
    pub capacity: f64,
    pub available: f64,
}

/// Maps source names to token buckets.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    buckets: RwLock<HashMap<String, SharedBucket>>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Registers (or replaces) the bucket for `source`.
    ///
    /// The bucket holds `requests_per_minute` tokens and starts full, so a
    /// re-registration discards whatever budget had been spent.
    pub fn register(&self, source: &str, requests_per_minute: f64) {
        let bucket = TokenBucket::per_minute(requests_per_minute, self.clock.clone());
        debug!(source, requests_per_minute, "rate limit registered");
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_owned(), Arc::new(Mutex::new(bucket)));
    }

    fn bucket(&self, source: &str) -> Option<SharedBucket> {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
    }

    fn lock(bucket: &Mutex<TokenBucket>) -> MutexGuard<'_, TokenBucket> {
        bucket.lock().unwrap_or_else(|poisoned| {
            warn!("token bucket mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn contains(&self, source: &str) -> bool {
        self.bucket(source).is_some()
    }

    /// Takes one token for `source`. Unknown sources always succeed.
    pub fn acquire(&self, source: &str) -> bool {
        match self.bucket(source) {
            Some(bucket) => Self::lock(&bucket).acquire(1.0),
            None => true,
        }
    }

    /// Time until one token is available. Zero for unknown sources.
    pub fn wait_time(&self, source: &str) -> Duration {
        match self.bucket(source) {
            Some(bucket) => Self::lock(&bucket).wait_time(1.0),
            None => Duration::ZERO,
        }
    }

    /// Acquires a token, sleeping up to `max_wait` for one to refill.
    ///
    /// Fails fast with [`ResilienceError::RateLimited`] when the required wait
    /// exceeds `max_wait`, and also when another caller takes the refilled
    /// token first.
    pub async fn acquire_or_wait(
        &self,
        source: &str,
        max_wait: Duration,
    ) -> Result<(), ResilienceError> {
        let wait = self.wait_time(source);
        if wait > max_wait {
            let retry_after_secs = ceil_secs(wait);
            warn!(source, retry_after_secs, "rate limit wait exceeds budget, failing fast");
            return Err(ResilienceError::rate_limited(source, retry_after_secs));
        }

        if !wait.is_zero() {
            debug!(source, wait_ms = wait.as_millis() as u64, "waiting for rate limit token");
            tokio::time::sleep(wait).await;
        }

        if self.acquire(source) {
            Ok(())
        } else {
            let retry_after_secs = ceil_secs(self.wait_time(source)).max(1);
            debug!(source, retry_after_secs, "token taken by a concurrent caller");
            Err(ResilienceError::rate_limited(source, retry_after_secs))
        }
    }

    pub fn limit(&self, source: &str) -> Option<RateLimit> {
        let bucket = self.bucket(source)?;
        let mut bucket = Self::lock(&bucket);
        Some(RateLimit {
            requests_per_minute: bucket.refill_rate() * 60.0,
            capacity: bucket.capacity(),
            available: bucket.available(),
        })
    }

    /// Registered source names, sorted.
    pub fn sources(&self) -> Vec<String> {
        let mut names = self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let extra = u64::from(duration.subsec_nanos() > 0);
    duration.as_secs().saturating_add(extra)
}

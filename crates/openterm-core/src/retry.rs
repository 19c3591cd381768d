//! Retry logic with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay before retry `k` (1-based) is `min(base * factor^(k-1), max)`,
    /// then scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Growth factor per retry.
        factor: f64,
        /// Cap applied before jitter.
        max: Duration,
        /// Jitter fraction in `[0, 1]`.
        jitter: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl Backoff {
    /// Delay to sleep after failed attempt number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped_seconds = seconds.min(max.as_secs_f64());

                let jitter = if jitter.is_finite() {
                    jitter.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let scale = 1.0 + (fastrand::f64() * 2.0 - 1.0) * jitter;

                Duration::try_from_secs_f64((capped_seconds * scale).max(0.0))
                    .unwrap_or(max)
            }
        }
    }
}

/// Bounded retry policy for a single upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// Exponential policy doubling from `base_delay` up to `max_delay`.
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Exponential {
                base: base_delay,
                factor: 2.0,
                max: max_delay,
                jitter,
            },
        }
    }

    /// Default exponential backoff with a custom retry budget.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Runs `operation` until it succeeds or the retry budget is spent.
    ///
    /// Every error is retried. When the budget runs out the error from the
    /// last attempt is returned as is.
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_when(operation, |_| true).await
    }

    /// Like [`run`](Self::run), but errors rejected by `should_retry` are
    /// returned immediately.
    pub async fn run_when<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        mut should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        let mut attempt = 0_u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_retries || !should_retry(&error) {
                        return Err(error);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    debug!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

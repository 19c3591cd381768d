use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};

/// Runtime circuit state for upstream calls to one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Successful probes required in half-open before the circuit closes.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            half_open_calls: 0,
        }
    }
}

/// Thread-safe circuit breaker guarding one source.
///
/// The breaker never fails: callers ask [`is_available`](Self::is_available)
/// before doing work and report the outcome afterwards.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
    clock: Arc<dyn Clock>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: String::from("circuit"),
            config,
            inner: Mutex::new(CircuitInner::default()),
            clock,
        }
    }

    /// Labels log output with the guarded source name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(breaker = %self.name, "circuit breaker mutex was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Whether a call may go through right now.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// here, on the query itself.
    pub fn is_available(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let now = self.clock.now();
                let recovered = inner.last_failure.map_or(true, |last_failure| {
                    now.saturating_duration_since(last_failure) >= self.config.recovery_timeout
                });
                if recovered {
                    info!(breaker = %self.name, "circuit transitioning from open to half_open");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_calls = 0;
                }
                recovered
            }
            CircuitState::HalfOpen => inner.half_open_calls < self.config.half_open_max_calls,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_calls = inner.half_open_calls.saturating_add(1);
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    info!(
                        breaker = %self.name,
                        successes = inner.half_open_calls,
                        "circuit closed after successful probes"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {
                debug!(breaker = %self.name, "success recorded while open, ignoring");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(self.clock.now());

        match inner.state {
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "probe failed, circuit reopened");
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                info!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "failure threshold reached, circuit opened"
                );
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed => {
                debug!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "failure recorded"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Forces the circuit closed and clears all counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = CircuitInner::default();
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn half_open_calls(&self) -> u32 {
        self.lock().half_open_calls
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.lock().last_failure
    }
}

//! Rolling request metrics for one source.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::clock::Clock;

/// Most recent records kept per source.
pub const MAX_RECORDS: usize = 1_000;

/// Trailing span covered by [`SourceMetrics::stats`].
pub const STATS_WINDOW: Duration = Duration::from_secs(300);

/// Outcome of one upstream call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestRecord {
    pub at: Instant,
    pub latency_ms: f64,
    pub success: bool,
}

/// Windowed statistics for a source, as reported to health consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub enabled: bool,
    pub circuit_state: CircuitState,
    /// Breaker availability only; the enabled flag is reported separately.
    pub is_available: bool,
    pub requests_last_5m: usize,
    pub failures_last_5m: usize,
    /// Percentage in `[0, 100]`, rounded to two decimals.
    pub failure_rate: f64,
    pub p95_latency_ms: f64,
}

/// Bounded request history plus the registry-level breaker for one source.
#[derive(Debug)]
pub struct SourceMetrics {
    source: String,
    enabled: AtomicBool,
    breaker: CircuitBreaker,
    requests: Mutex<VecDeque<RequestRecord>>,
    clock: Arc<dyn Clock>,
}

impl SourceMetrics {
    pub fn new(
        source: impl Into<String>,
        enabled: bool,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let source = source.into();
        let breaker = CircuitBreaker::with_clock(config, clock.clone()).named(source.clone());
        Self {
            source,
            enabled: AtomicBool::new(enabled),
            breaker,
            requests: Mutex::new(VecDeque::with_capacity(MAX_RECORDS)),
            clock,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Enabled and the breaker admits calls.
    pub fn is_available(&self) -> bool {
        self.enabled() && self.breaker.is_available()
    }

    fn records(&self) -> MutexGuard<'_, VecDeque<RequestRecord>> {
        self.requests.lock().unwrap_or_else(|poisoned| {
            warn!(source = %self.source, "metrics mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Appends an outcome and forwards it to the breaker.
    pub fn record_request(&self, latency_ms: f64, success: bool) {
        let record = RequestRecord {
            at: self.clock.now(),
            latency_ms,
            success,
        };
        {
            let mut records = self.records();
            if records.len() == MAX_RECORDS {
                records.pop_front();
            }
            records.push_back(record);
        }

        if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
    }

    /// Number of retained records, regardless of age.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SourceStats {
        let now = self.clock.now();
        let (total, failures, mut latencies) = {
            let records = self.records();
            let recent = records
                .iter()
                .filter(|record| now.saturating_duration_since(record.at) <= STATS_WINDOW);

            let mut total = 0_usize;
            let mut failures = 0_usize;
            let mut latencies = Vec::new();
            for record in recent {
                total += 1;
                if record.success {
                    latencies.push(record.latency_ms);
                } else {
                    failures += 1;
                }
            }
            (total, failures, latencies)
        };

        let failure_rate = if total == 0 {
            0.0
        } else {
            failures as f64 / total as f64 * 100.0
        };

        // State is read first: is_available may move Open to HalfOpen.
        let circuit_state = self.breaker.state();
        let is_available = self.breaker.is_available();

        SourceStats {
            source: self.source.clone(),
            enabled: self.enabled(),
            circuit_state,
            is_available,
            requests_last_5m: total,
            failures_last_5m: failures,
            failure_rate: round2(failure_rate),
            p95_latency_ms: round2(p95(&mut latencies)),
        }
    }
}

/// Nearest-rank 95th percentile: the value at 1-based rank `floor(0.95 * n)`,
/// clamped to the sample. No interpolation.
fn p95(latencies: &mut [f64]) -> f64 {
    if latencies.is_empty() {
        return 0.0;
    }
    latencies.sort_by(f64::total_cmp);
    let rank = (latencies.len() as f64 * 0.95) as usize;
    latencies[rank.clamp(1, latencies.len()) - 1]
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn metrics(threshold: u32) -> (SourceMetrics, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let metrics = SourceMetrics::new(
            "stooq",
            true,
            CircuitBreakerConfig::new(threshold, Duration::from_secs(60)),
            clock.clone(),
        );
        (metrics, clock)
    }

    #[test]
    fn p95_uses_floor_index_selection() {
        let (metrics, _clock) = metrics(5);
        for latency in (1..=100).rev() {
            metrics.record_request(f64::from(latency), true);
        }

        let stats = metrics.stats();
        assert_eq!(stats.requests_last_5m, 100);
        assert!((stats.p95_latency_ms - 95.0).abs() < f64::EPSILON);
    }

    #[test]
    fn p95_ignores_failed_requests() {
        let (metrics, _clock) = metrics(100);
        metrics.record_request(10.0, true);
        metrics.record_request(5_000.0, false);

        let stats = metrics.stats();
        assert!((stats.p95_latency_ms - 10.0).abs() < f64::EPSILON);
        assert_eq!(stats.failures_last_5m, 1);
        assert!((stats.failure_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_metrics_report_zeroes() {
        let (metrics, _clock) = metrics(5);
        let stats = metrics.stats();

        assert_eq!(stats.requests_last_5m, 0);
        assert_eq!(stats.failure_rate, 0.0);
        assert_eq!(stats.p95_latency_ms, 0.0);
        assert!(stats.is_available);
        assert_eq!(stats.circuit_state, CircuitState::Closed);
    }

    #[test]
    fn ring_buffer_evicts_oldest_records() {
        let (metrics, _clock) = metrics(u32::MAX);
        metrics.record_request(1.0, false);
        for _ in 0..MAX_RECORDS {
            metrics.record_request(2.0, true);
        }

        assert_eq!(metrics.len(), MAX_RECORDS);
        assert_eq!(metrics.stats().failures_last_5m, 0);
    }

    #[test]
    fn records_outside_the_window_are_excluded() {
        let (metrics, clock) = metrics(100);
        metrics.record_request(10.0, false);
        clock.advance(Duration::from_secs(301));
        metrics.record_request(20.0, true);

        let stats = metrics.stats();
        assert_eq!(stats.requests_last_5m, 1);
        assert_eq!(stats.failures_last_5m, 0);
        assert_eq!(metrics.len(), 2);
    }

    #[test]
    fn failures_drive_the_embedded_breaker() {
        let (metrics, _clock) = metrics(2);
        metrics.record_request(1.0, false);
        metrics.record_request(1.0, false);

        let stats = metrics.stats();
        assert_eq!(stats.circuit_state, CircuitState::Open);
        assert!(!stats.is_available);
        assert_eq!(metrics.circuit_breaker().name(), "stooq");
    }

    #[test]
    fn stats_report_state_observed_before_the_recovery_check() {
        let (metrics, clock) = metrics(1);
        metrics.record_request(1.0, false);
        clock.advance(Duration::from_secs(60));

        let stats = metrics.stats();
        assert_eq!(stats.circuit_state, CircuitState::Open);
        assert!(stats.is_available);
        assert_eq!(metrics.circuit_breaker().state(), CircuitState::HalfOpen);
    }

    #[test]
    fn disabled_source_reports_flag_apart_from_breaker() {
        let (metrics, _clock) = metrics(5);
        metrics.set_enabled(false);

        let stats = metrics.stats();
        assert!(!stats.enabled);
        assert!(stats.is_available);
        assert!(!metrics.is_available());
        assert_eq!(stats.circuit_state, CircuitState::Closed);
    }

    #[test]
    fn single_sample_p95_is_that_sample() {
        let (metrics, _clock) = metrics(5);
        metrics.record_request(42.5, true);

        assert!((metrics.stats().p95_latency_ms - 42.5).abs() < f64::EPSILON);
    }

    #[test]
    fn failure_rate_is_rounded_to_two_decimals() {
        let (metrics, _clock) = metrics(100);
        metrics.record_request(1.0, false);
        metrics.record_request(1.0, true);
        metrics.record_request(1.0, true);

        assert!((metrics.stats().failure_rate - 33.33).abs() < 1e-9);
    }
}

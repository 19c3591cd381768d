//! Registry of per-source metrics and circuit breakers.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use crate::clock::{Clock, SystemClock};
use crate::source_metrics::{SourceMetrics, SourceStats};

/// Aggregate status across registered sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Healthy,
    Degraded,
}

impl SummaryStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
        }
    }
}

impl Display for SummaryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub status: SummaryStatus,
    pub sources: Vec<SourceStats>,
    pub degraded_sources: Vec<String>,
}

/// Source name to [`SourceMetrics`]. Unknown sources are never gated.
#[derive(Debug)]
pub struct SourceRegistry {
    sources: RwLock<BTreeMap<String, Arc<SourceMetrics>>>,
    clock: Arc<dyn Clock>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sources: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    /// Registers `source` with a fresh breaker, replacing any previous entry
    /// together with its history.
    pub fn register(
        &self,
        source: &str,
        enabled: bool,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) {
        let config = CircuitBreakerConfig::new(failure_threshold, recovery_timeout);
        let metrics = SourceMetrics::new(source, enabled, config, self.clock.clone());
        debug!(
            source,
            enabled,
            failure_threshold,
            recovery_timeout_secs = recovery_timeout.as_secs_f64(),
            "source registered"
        );
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_owned(), Arc::new(metrics));
    }

    pub fn get(&self, source: &str) -> Option<Arc<SourceMetrics>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
    }

    pub fn contains(&self, source: &str) -> bool {
        self.get(source).is_some()
    }

    /// `true` for unknown sources; otherwise enabled and breaker admits calls.
    pub fn is_available(&self, source: &str) -> bool {
        self.get(source)
            .map_or(true, |metrics| metrics.is_available())
    }

    /// No-op for unknown sources.
    pub fn record_request(&self, source: &str, latency_ms: f64, success: bool) {
        if let Some(metrics) = self.get(source) {
            metrics.record_request(latency_ms, success);
        }
    }

    /// Toggles a source at runtime. Returns `false` if it is not registered.
    pub fn set_enabled(&self, source: &str, enabled: bool) -> bool {
        match self.get(source) {
            Some(metrics) => {
                info!(source, enabled, "source enabled flag changed");
                metrics.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Stats for every registered source, ordered by name.
    pub fn all_stats(&self) -> Vec<SourceStats> {
        let entries = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect::<Vec<_>>();
        entries.iter().map(|metrics| metrics.stats()).collect()
    }

    /// Degraded when any source is disabled or its circuit is not closed.
    pub fn health_summary(&self) -> HealthSummary {
        let sources = self.all_stats();
        let degraded_sources = sources
            .iter()
            .filter(|stats| !stats.enabled || stats.circuit_state != CircuitState::Closed)
            .map(|stats| stats.source.clone())
            .collect::<Vec<_>>();
        let status = if degraded_sources.is_empty() {
            SummaryStatus::Healthy
        } else {
            SummaryStatus::Degraded
        };

        HealthSummary {
            status,
            sources,
            degraded_sources,
        }
    }
}

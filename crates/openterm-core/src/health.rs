//! Adapter health, readiness and the merged source health report.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::client::SourceClient;
use crate::config::FeatureFlags;
use crate::resilience::Resilience;
use crate::source::SourceId;
use crate::source_metrics::SourceStats;
use crate::source_registry::SummaryStatus;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl AdapterStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl Display for AdapterStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health as seen by one adapter, from its own call history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterHealth {
    pub status: AdapterStatus,
    pub last_success: Option<Timestamp>,
    pub last_failure: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub avg_latency_ms: Option<f64>,
}

/// Connectivity block attached to a source in the health report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connectivity {
    pub reachable: bool,
    pub last_success: Option<Timestamp>,
    pub last_failure: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<AdapterHealth> for Connectivity {
    fn from(health: AdapterHealth) -> Self {
        Self {
            reachable: health.status == AdapterStatus::Healthy,
            last_success: health.last_success,
            last_failure: health.last_failure,
            error: health.error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    #[serde(flatten)]
    pub stats: SourceStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<Connectivity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: SummaryStatus,
    pub timestamp: Timestamp,
    pub degraded_sources: Vec<String>,
    pub sources: Vec<SourceReport>,
    pub feature_flags: FeatureFlags,
}

impl HealthReport {
    /// Registry summary merged with each client's local view.
    ///
    /// Clients for sources the registry does not know are ignored.
    pub fn build(resilience: &Resilience, clients: &[&SourceClient]) -> Self {
        let summary = resilience.sources().health_summary();
        let sources = summary
            .sources
            .into_iter()
            .map(|stats| {
                let connectivity = clients
                    .iter()
                    .find(|client| client.source() == stats.source)
                    .map(|client| Connectivity::from(client.health_check()));
                SourceReport {
                    stats,
                    connectivity,
                }
            })
            .collect();

        Self {
            status: summary.status,
            timestamp: Timestamp::now(),
            degraded_sources: summary.degraded_sources,
            sources,
            feature_flags: resilience.settings().feature_flags(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ready,
    NotReady,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Readiness {
    pub status: ReadinessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: Timestamp,
}

impl Readiness {
    /// Ready while at least one enabled price source is available.
    pub fn evaluate(resilience: &Resilience) -> Self {
        let price_source_available = SourceId::PRICE_SOURCES.iter().any(|source| {
            resilience.settings().is_enabled(*source)
                && resilience.sources().is_available(source.as_str())
        });

        if price_source_available {
            Self {
                status: ReadinessStatus::Ready,
                reason: None,
                timestamp: Timestamp::now(),
            }
        } else {
            Self {
                status: ReadinessStatus::NotReady,
                reason: Some(String::from("No price data source available")),
                timestamp: Timestamp::now(),
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ReadinessStatus::Ready
    }
}

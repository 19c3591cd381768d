use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::ResilienceSettings;
use crate::rate_limiter::RateLimiterRegistry;
use crate::source::SourceId;
use crate::source_registry::SourceRegistry;

/// Process-wide resilience state, built once at startup and shared as
/// `Arc<Resilience>` with every client that calls an upstream source.
#[derive(Debug)]
pub struct Resilience {
    clock: Arc<dyn Clock>,
    rate_limiter: RateLimiterRegistry,
    sources: SourceRegistry,
    settings: ResilienceSettings,
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl Resilience {
    /// Empty registries with default settings. Sources must be registered
    /// explicitly.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rate_limiter: RateLimiterRegistry::with_clock(clock.clone()),
            sources: SourceRegistry::with_clock(clock.clone()),
            settings: ResilienceSettings::default(),
            clock,
        }
    }

    /// Registers every well-known source with its quota, breaker policy and
    /// enabled flag.
    pub fn from_settings(settings: ResilienceSettings, clock: Arc<dyn Clock>) -> Self {
        let mut resilience = Self::new(clock);
        for source in SourceId::ALL {
            let policy = settings.circuit_policy(source);
            resilience
                .rate_limiter
                .register(source.as_str(), settings.requests_per_minute(source));
            resilience.sources.register(
                source.as_str(),
                settings.is_enabled(source),
                policy.failure_threshold,
                policy.recovery_timeout,
            );
        }
        info!(
            sources = SourceId::ALL.len(),
            max_wait_secs = settings.max_wait.as_secs(),
            "resilience registries initialized"
        );
        resilience.settings = settings;
        resilience
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn rate_limiter(&self) -> &RateLimiterRegistry {
        &self.rate_limiter
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn settings(&self) -> &ResilienceSettings {
        &self.settings
    }
}

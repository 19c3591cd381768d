//! # OpenTerm Core
//!
//! Resilience layer governing every outbound call OpenTerm makes to its free,
//! quota-limited market data sources.
//!
//! ## Overview
//!
//! - **Token buckets** per source, with a bounded async `acquire_or_wait`
//! - **Circuit breakers** with lazy open to half-open recovery
//! - **Retry** with exponential backoff and jitter
//! - **Rolling metrics** per source (5 minute window, p95 latency)
//! - **Health summary and readiness** derived from the registries
//! - **Source client** composing all of the above around an HTTP transport
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`token_bucket`] | Lazily refilled token bucket |
//! | [`circuit_breaker`] | Closed / open / half-open state machine |
//! | [`retry`] | Backoff strategies and the retry loop |
//! | [`rate_limiter`] | Source name to token bucket registry |
//! | [`source_metrics`] | Request history and windowed stats |
//! | [`source_registry`] | Source name to metrics registry, health summary |
//! | [`resilience`] | Injected service object owning both registries |
//! | [`client`] | Per-source request wrapper |
//! | [`health`] | Adapter health, readiness, health report |
//! | [`config`] | `OPENTERM_*` environment settings |
//! | [`http_client`] | HTTP transport abstraction |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use openterm_core::{
//!     HttpRequest, ReqwestHttpClient, Resilience, ResilienceSettings, SourceClient, SourceId,
//!     SystemClock,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ResilienceSettings::from_env()?;
//!     let resilience = Arc::new(Resilience::from_settings(settings, Arc::new(SystemClock)));
//!
//!     let stooq = SourceClient::for_source(
//!         SourceId::Stooq,
//!         Arc::new(ReqwestHttpClient::new()),
//!         resilience.clone(),
//!     );
//!     let response = stooq
//!         .request(HttpRequest::get("https://stooq.com/q/l/?s=aapl.us&i=d"))
//!         .await?;
//!     println!("{}", response.body);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Primitives never fail; the orchestration layer returns [`ResilienceError`]:
//!
//! ```rust
//! use openterm_core::{ErrorKind, ResilienceError};
//!
//! fn handle_error(error: &ResilienceError) {
//!     match error.kind() {
//!         ErrorKind::RateLimited => {
//!             let _wait_secs = error.retry_after();
//!         }
//!         ErrorKind::CircuitOpen => {
//!             // Try another source
//!         }
//!         _ if error.is_retryable() => {}
//!         _ => {}
//!     }
//! }
//! ```

pub mod circuit_breaker;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod http_client;
pub mod rate_limiter;
pub mod resilience;
pub mod retry;
pub mod source;
pub mod source_metrics;
pub mod source_registry;
pub mod timestamp;
pub mod token_bucket;

// Re-export commonly used types at crate root for convenience

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::SourceClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FeatureFlags, ResilienceSettings};
pub use error::{ErrorBody, ErrorKind, ResilienceError};
pub use health::{
    AdapterHealth, AdapterStatus, Connectivity, HealthReport, Readiness, ReadinessStatus,
    SourceReport,
};
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpFuture, HttpMethod, HttpRequest, HttpResponse,
    NoopHttpClient, ReqwestHttpClient,
};
pub use rate_limiter::{RateLimit, RateLimiterRegistry};
pub use resilience::Resilience;
pub use retry::{Backoff, RetryPolicy};
pub use source::SourceId;
pub use source_metrics::{RequestRecord, SourceMetrics, SourceStats};
pub use source_registry::{HealthSummary, SourceRegistry, SummaryStatus};
pub use timestamp::Timestamp;
pub use token_bucket::TokenBucket;

//! Request wrapper composing rate limiting, circuit breaking and retry
//! around an [`HttpClient`] for one source.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::ResilienceError;
use crate::health::{AdapterHealth, AdapterStatus};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::resilience::Resilience;
use crate::retry::RetryPolicy;
use crate::source::SourceId;
use crate::timestamp::Timestamp;

/// Successful latencies kept for the adapter's average.
const LATENCY_HISTORY: usize = 100;

/// Retries after the first attempt for adapter calls.
const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Default)]
struct History {
    last_success: Option<Timestamp>,
    last_failure: Option<Timestamp>,
    last_failed: bool,
    latencies: VecDeque<f64>,
}

/// Calls one upstream source through the shared [`Resilience`] registries.
///
/// Every attempt is recorded in the source registry, so its breaker and
/// metrics see the same traffic the adapter does. An adapter-local breaker
/// can be layered on top with [`with_local_breaker`](Self::with_local_breaker).
pub struct SourceClient {
    source: String,
    http: Arc<dyn HttpClient>,
    resilience: Arc<Resilience>,
    local_breaker: Option<CircuitBreaker>,
    retry: RetryPolicy,
    timeout: Duration,
    max_wait: Duration,
    history: Mutex<History>,
}

impl std::fmt::Debug for SourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceClient")
            .field("source", &self.source)
            .field("local_breaker", &self.local_breaker)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

impl SourceClient {
    pub fn new(
        source: impl Into<String>,
        http: Arc<dyn HttpClient>,
        resilience: Arc<Resilience>,
    ) -> Self {
        let settings = resilience.settings();
        Self {
            source: source.into(),
            timeout: settings.request_timeout,
            max_wait: settings.max_wait,
            http,
            resilience,
            local_breaker: None,
            retry: RetryPolicy::exponential(DEFAULT_MAX_RETRIES),
            history: Mutex::new(History::default()),
        }
    }

    pub fn for_source(
        source: SourceId,
        http: Arc<dyn HttpClient>,
        resilience: Arc<Resilience>,
    ) -> Self {
        Self::new(source.as_str(), http, resilience)
    }

    /// Adds an adapter-local breaker checked before the shared registry.
    pub fn with_local_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.local_breaker = Some(breaker.named(self.source.clone()));
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn local_breaker(&self) -> Option<&CircuitBreaker> {
        self.local_breaker.as_ref()
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(|poisoned| {
            warn!(source = %self.source, "client history mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Sends `request`, gated by the local breaker, the rate limiter and the
    /// registry, retrying transient failures.
    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse, ResilienceError> {
        if let Some(breaker) = &self.local_breaker {
            if !breaker.is_available() {
                debug!(source = %self.source, "local circuit open, rejecting request");
                return Err(ResilienceError::circuit_open(&self.source));
            }
        }

        self.resilience
            .rate_limiter()
            .acquire_or_wait(&self.source, self.max_wait)
            .await?;

        if !self.resilience.sources().is_available(&self.source) {
            debug!(source = %self.source, "source unavailable, rejecting request");
            return Err(ResilienceError::circuit_open(&self.source));
        }

        let request = request.with_timeout(self.timeout);
        self.retry
            .run_when(
                || self.attempt(request.clone()),
                ResilienceError::is_retryable,
            )
            .await
    }

    async fn attempt(&self, request: HttpRequest) -> Result<HttpResponse, ResilienceError> {
        let clock = self.resilience.clock();
        let started = clock.now();
        let timeout = request.timeout();

        let outcome = tokio::time::timeout(timeout, self.http.execute(request)).await;
        let latency_ms = clock.now().saturating_duration_since(started).as_secs_f64() * 1_000.0;

        let result = match outcome {
            Err(_) => Err(ResilienceError::timeout(&self.source)),
            Ok(Err(error)) if error.is_timeout() => Err(ResilienceError::timeout(&self.source)),
            Ok(Err(error)) => Err(ResilienceError::upstream(&self.source, error.message())),
            Ok(Ok(response)) if response.is_success() => Ok(response),
            Ok(Ok(response)) => Err(ResilienceError::http_status(
                &self.source,
                response.status,
                status_reason(response.status),
            )),
        };

        match &result {
            Ok(_) => self.record_success(latency_ms),
            Err(error) => {
                warn!(source = %self.source, latency_ms, %error, "upstream request failed");
                self.record_failure(latency_ms);
            }
        }
        result
    }

    fn record_success(&self, latency_ms: f64) {
        self.resilience
            .sources()
            .record_request(&self.source, latency_ms, true);
        if let Some(breaker) = &self.local_breaker {
            breaker.record_success();
        }

        let mut history = self.history();
        history.last_success = Some(Timestamp::now());
        history.last_failed = false;
        if history.latencies.len() == LATENCY_HISTORY {
            history.latencies.pop_front();
        }
        history.latencies.push_back(latency_ms);
    }

    fn record_failure(&self, latency_ms: f64) {
        self.resilience
            .sources()
            .record_request(&self.source, latency_ms, false);
        if let Some(breaker) = &self.local_breaker {
            breaker.record_failure();
        }

        let mut history = self.history();
        history.last_failure = Some(Timestamp::now());
        history.last_failed = true;
    }

    /// Local view of the source. Never fails and never touches the network.
    pub fn health_check(&self) -> AdapterHealth {
        let gate_open = self
            .local_breaker
            .as_ref()
            .map_or(true, CircuitBreaker::is_available)
            && self
                .resilience
                .sources()
                .get(&self.source)
                .map_or(true, |metrics| metrics.circuit_breaker().is_available());

        let history = self.history();
        let avg_latency_ms = if history.latencies.is_empty() {
            None
        } else {
            Some(history.latencies.iter().sum::<f64>() / history.latencies.len() as f64)
        };

        let (status, error) = if !gate_open {
            (AdapterStatus::Unhealthy, Some(String::from("Circuit breaker open")))
        } else if history.last_failed {
            (AdapterStatus::Degraded, None)
        } else {
            (AdapterStatus::Healthy, None)
        };

        AdapterHealth {
            status,
            last_success: history.last_success,
            last_failure: history.last_failure,
            error,
            avg_latency_ms,
        }
    }
}

fn status_reason(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("unexpected status")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ResilienceSettings;
    use crate::http_client::{HttpError, HttpFuture};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers each call from a fixed script, repeating the last entry.
    struct Scripted {
        replies: Vec<Result<HttpResponse, HttpError>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(replies: Vec<Result<HttpResponse, HttpError>>) -> Arc<Self> {
            Arc::new(Self {
                replies,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpClient for Scripted {
        fn execute<'a>(&'a self, _request: HttpRequest) -> HttpFuture<'a> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let reply = self.replies[index.min(self.replies.len() - 1)].clone();
            Box::pin(async move { reply })
        }
    }

    fn resilience() -> Arc<Resilience> {
        Arc::new(Resilience::from_settings(
            ResilienceSettings::default(),
            Arc::new(ManualClock::new()),
        ))
    }

    fn client(http: Arc<Scripted>, resilience: Arc<Resilience>) -> SourceClient {
        SourceClient::for_source(SourceId::Stooq, http, resilience)
            .with_retry_policy(RetryPolicy::fixed(Duration::from_millis(1), 2))
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let http = Scripted::new(vec![
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::ok("Symbol,Close\nAAPL,190.1")),
        ]);
        let resilience = resilience();
        let client = client(http.clone(), resilience.clone());

        let response = client
            .request(HttpRequest::get("https://stooq.example/q/l/?s=aapl.us"))
            .await
            .expect("second attempt succeeds");

        assert_eq!(response.status, 200);
        assert_eq!(http.calls(), 2);
        let stats = resilience.sources().get("stooq").expect("registered").stats();
        assert_eq!(stats.requests_last_5m, 2);
        assert_eq!(stats.failures_last_5m, 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let http = Scripted::new(vec![Ok(HttpResponse::new(404, ""))]);
        let client = client(http.clone(), resilience());

        let error = client
            .request(HttpRequest::get("https://stooq.example/missing"))
            .await
            .expect_err("404 is final");

        assert_eq!(
            error,
            ResilienceError::Upstream {
                provider: String::from("stooq"),
                message: String::from("HTTP 404: Not Found"),
                status: Some(404),
                retryable: false,
            }
        );
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn transport_timeouts_map_to_upstream_timeout() {
        let http = Scripted::new(vec![Err(HttpError::timeout("request timeout"))]);
        let client = client(http.clone(), resilience());

        let error = client
            .request(HttpRequest::get("https://stooq.example/slow"))
            .await
            .expect_err("every attempt times out");

        assert_eq!(error, ResilienceError::timeout("stooq"));
        assert_eq!(http.calls(), 3);
    }

    #[tokio::test]
    async fn open_local_breaker_rejects_without_calling_upstream() {
        let http = Scripted::new(vec![Ok(HttpResponse::ok("{}"))]);
        let breaker = CircuitBreaker::with_clock(
            crate::CircuitBreakerConfig::new(1, Duration::from_secs(30)),
            Arc::new(ManualClock::new()),
        );
        breaker.record_failure();
        let client = client(http.clone(), resilience()).with_local_breaker(breaker);

        let error = client
            .request(HttpRequest::get("https://stooq.example/q"))
            .await
            .expect_err("local breaker is open");

        assert_eq!(error, ResilienceError::circuit_open("stooq"));
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn health_check_tracks_latest_outcome() {
        let http = Scripted::new(vec![
            Ok(HttpResponse::ok("{}")),
            Ok(HttpResponse::new(400, "")),
        ]);
        let client = client(http, resilience());
        assert_eq!(client.health_check().status, AdapterStatus::Healthy);

        client
            .request(HttpRequest::get("https://stooq.example/a"))
            .await
            .expect("first call succeeds");
        let health = client.health_check();
        assert_eq!(health.status, AdapterStatus::Healthy);
        assert!(health.last_success.is_some());
        assert_eq!(health.avg_latency_ms, Some(0.0));

        client
            .request(HttpRequest::get("https://stooq.example/b"))
            .await
            .expect_err("400 fails");
        let health = client.health_check();
        assert_eq!(health.status, AdapterStatus::Degraded);
        assert!(health.error.is_none());
    }
}

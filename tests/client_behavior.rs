//! Behavior-driven tests for the source client request wrapper
//!
//! These tests verify WHAT a caller observes when an upstream source is
//! slow, failing, rate limited or tripped, and what the registries record.

use std::sync::Arc;
use std::time::Duration;

use openterm_core::{AdapterStatus, HttpErrorKind};
use openterm_tests::{
    fast_retry, ok, resilience, resilience_with, status, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, HangingHttpClient, HttpError, HttpRequest, ManualClock, ResilienceError,
    ResilienceSettings, ScriptedHttpClient, SourceClient, SourceId,
};

/// Yahoo's default hourly quota would make back-to-back requests sleep.
fn generous_yahoo() -> ResilienceSettings {
    ResilienceSettings {
        yahoo_rph: 6_000,
        ..ResilienceSettings::default()
    }
}

// =============================================================================
// Error classification
// =============================================================================

#[tokio::test]
async fn when_upstream_returns_5xx_then_client_retries_and_records_each_attempt() {
    // Given: stooq answers 502 twice, then succeeds
    let (resilience, _clock) = resilience();
    let http = ScriptedHttpClient::new(vec![status(502), status(502), ok("Close\n190.5")]);
    let client = SourceClient::for_source(SourceId::Stooq, http.clone(), resilience.clone())
        .with_retry_policy(fast_retry(2));

    // When: The caller requests a quote
    let response = client
        .request(HttpRequest::get("https://stooq.example/q/l/?s=aapl.us"))
        .await
        .expect("third attempt succeeds");

    // Then: The payload comes back after three calls
    assert_eq!(response.body, "Close\n190.5");
    assert_eq!(http.calls(), 3);

    // And: Every attempt is visible in the registry
    let stats = resilience.sources().get("stooq").expect("registered").stats();
    assert_eq!(stats.requests_last_5m, 3);
    assert_eq!(stats.failures_last_5m, 2);
    assert_eq!(stats.circuit_state, CircuitState::Closed);
}

#[tokio::test]
async fn when_upstream_returns_4xx_then_error_is_final_and_not_retryable() {
    // Given: sec_edgar rejects the request
    let (resilience, _clock) = resilience();
    let http = ScriptedHttpClient::always(status(403));
    let client = SourceClient::for_source(SourceId::SecEdgar, http.clone(), resilience)
        .with_retry_policy(fast_retry(2));

    // When: The caller requests a filing index
    let error = client
        .request(HttpRequest::get("https://sec.example/cgi-bin/browse-edgar"))
        .await
        .expect_err("403 is a client error");

    // Then: It fails after one attempt with a non-retryable upstream error
    assert_eq!(http.calls(), 1);
    assert!(!error.is_retryable());
    assert_eq!(error.status_code(), 502);
    assert_eq!(error.to_string(), "sec_edgar: HTTP 403: Forbidden");
}

#[tokio::test]
async fn when_transport_fails_to_connect_then_error_is_retryable_upstream() {
    // Given: fred cannot be reached at all
    let (resilience, _clock) = resilience();
    let http = ScriptedHttpClient::always(Err(HttpError::connect("connection refused")));
    let client = SourceClient::for_source(SourceId::Fred, http.clone(), resilience)
        .with_retry_policy(fast_retry(1));

    // When: The caller requests a series
    let error = client
        .request(HttpRequest::get("https://fred.example/series/GDP"))
        .await
        .expect_err("connection is refused");

    // Then: Both attempts ran and the last error is a retryable upstream error
    assert_eq!(http.calls(), 2);
    assert_eq!(error, ResilienceError::upstream("fred", "connection refused"));
    assert!(error.is_retryable());
    assert_eq!(HttpError::connect("x").kind(), HttpErrorKind::Connect);
}

#[tokio::test]
async fn when_upstream_hangs_past_timeout_then_client_reports_upstream_timeout() {
    // Given: finnhub never answers and the client waits 20ms per attempt
    let (resilience, _clock) = resilience();
    let client = SourceClient::for_source(
        SourceId::Finnhub,
        Arc::new(HangingHttpClient),
        resilience.clone(),
    )
    .with_retry_policy(fast_retry(0))
    .with_timeout(Duration::from_millis(20));

    // When: The caller requests news
    let error = client
        .request(HttpRequest::get("https://finnhub.example/news"))
        .await
        .expect_err("request hangs");

    // Then: The error is a timeout and the failure was recorded
    assert_eq!(error, ResilienceError::timeout("finnhub"));
    assert_eq!(error.code(), "SOURCE_TIMEOUT");
    let stats = resilience.sources().get("finnhub").expect("registered").stats();
    assert_eq!(stats.failures_last_5m, 1);
}

// =============================================================================
// Gating
// =============================================================================

#[tokio::test]
async fn when_registry_circuit_opens_then_client_fails_fast_without_calling_upstream() {
    // Given: yahoo_finance trips after three failures (its registry policy)
    let (resilience, _clock) = resilience_with(generous_yahoo());
    let http = ScriptedHttpClient::always(status(500));
    let client = SourceClient::for_source(SourceId::YahooFinance, http.clone(), resilience.clone())
        .with_retry_policy(fast_retry(2));

    // When: One request exhausts its three attempts
    client
        .request(HttpRequest::get("https://yahoo.example/v8/chart/AAPL"))
        .await
        .expect_err("every attempt fails");
    assert_eq!(http.calls(), 3);

    // Then: The next request is rejected before reaching the transport
    let error = client
        .request(HttpRequest::get("https://yahoo.example/v8/chart/MSFT"))
        .await
        .expect_err("circuit is open");
    assert_eq!(error, ResilienceError::circuit_open("yahoo_finance"));
    assert_eq!(http.calls(), 3);
}

#[tokio::test]
async fn when_recovery_timeout_passes_then_half_open_probe_reaches_upstream() {
    // Given: An open yahoo_finance circuit
    let (resilience, clock) = resilience_with(generous_yahoo());
    let http = ScriptedHttpClient::new(vec![status(500), status(500), status(500), ok("{}")]);
    let client = SourceClient::for_source(SourceId::YahooFinance, http.clone(), resilience.clone())
        .with_retry_policy(fast_retry(2));
    client
        .request(HttpRequest::get("https://yahoo.example/a"))
        .await
        .expect_err("trips the breaker");

    // When: Its 120s recovery timeout elapses
    clock.advance(Duration::from_secs(120));

    // Then: A probe is admitted and succeeds
    client
        .request(HttpRequest::get("https://yahoo.example/b"))
        .await
        .expect("probe succeeds");
    let breaker_state = resilience
        .sources()
        .get("yahoo_finance")
        .expect("registered")
        .circuit_breaker()
        .state();
    assert_eq!(breaker_state, CircuitState::HalfOpen);
}

#[tokio::test]
async fn when_source_is_disabled_then_client_reports_circuit_open() {
    // Given: yahoo disabled by feature flag
    let (resilience, _clock) = resilience_with(ResilienceSettings {
        enable_yahoo: false,
        ..ResilienceSettings::default()
    });
    let http = ScriptedHttpClient::always(ok("{}"));
    let client = SourceClient::for_source(SourceId::YahooFinance, http.clone(), resilience);

    // When/Then: Requests are refused and the transport is untouched
    let error = client
        .request(HttpRequest::get("https://yahoo.example/q"))
        .await
        .expect_err("source disabled");
    assert_eq!(error, ResilienceError::circuit_open("yahoo_finance"));
    assert_eq!(http.calls(), 0);
}

#[tokio::test]
async fn when_rate_budget_is_spent_then_client_fails_fast_with_retry_hint() {
    // Given: stooq limited to 1 rpm and a client willing to wait 1s
    let (resilience, _clock) = resilience_with(ResilienceSettings {
        stooq_rpm: 1,
        ..ResilienceSettings::default()
    });
    let http = ScriptedHttpClient::always(ok("{}"));
    let client = SourceClient::for_source(SourceId::Stooq, http.clone(), resilience)
        .with_max_wait(Duration::from_secs(1));

    // When: Two requests are made back to back
    client
        .request(HttpRequest::get("https://stooq.example/1"))
        .await
        .expect("first request uses the only token");
    let error = client
        .request(HttpRequest::get("https://stooq.example/2"))
        .await
        .expect_err("second request would wait a minute");

    // Then: The error suggests retrying after the refill time
    assert_eq!(error, ResilienceError::rate_limited("stooq", 60));
    assert_eq!(error.to_body().retry_after_seconds, Some(60));
    assert_eq!(http.calls(), 1);
}

#[tokio::test]
async fn when_local_breaker_is_configured_then_it_trips_independently_of_registry() {
    // Given: A local breaker tripping after one failure, registry at threshold 5
    let (resilience, _clock) = resilience();
    let http = ScriptedHttpClient::new(vec![status(503), ok("{}")]);
    let local = CircuitBreaker::with_clock(
        CircuitBreakerConfig::new(1, Duration::from_secs(30)),
        Arc::new(ManualClock::new()),
    );
    let client = SourceClient::for_source(SourceId::Stooq, http.clone(), resilience.clone())
        .with_retry_policy(fast_retry(0))
        .with_local_breaker(local);

    // When: One request fails
    client
        .request(HttpRequest::get("https://stooq.example/1"))
        .await
        .expect_err("503");

    // Then: The local breaker is open while the registry still admits calls
    assert_eq!(
        client.local_breaker().map(CircuitBreaker::state),
        Some(CircuitState::Open)
    );
    assert!(resilience.sources().is_available("stooq"));

    // And: The adapter reports itself unhealthy
    let health = client.health_check();
    assert_eq!(health.status, AdapterStatus::Unhealthy);
    assert_eq!(health.error.as_deref(), Some("Circuit breaker open"));
}

#[tokio::test]
async fn when_request_is_sent_then_client_timeout_is_applied() {
    // Given: A client with a 1.5s timeout
    let (resilience, _clock) = resilience();
    let http = ScriptedHttpClient::always(ok("{}"));
    let client = SourceClient::for_source(SourceId::Fred, http.clone(), resilience)
        .with_timeout(Duration::from_millis(1_500));

    // When: A request is sent
    client
        .request(HttpRequest::get("https://fred.example/series/CPI"))
        .await
        .expect("succeeds");

    // Then: The transport saw the client's timeout
    let requests = http.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].timeout_ms, 1_500);
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use openterm_core::{
    AdapterHealth, HttpClient, HttpRequest, Resilience, RetryPolicy, SourceClient, SourceId,
    SourceStats,
};

use crate::cli::ProbeArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct ProbeResponseData {
    source: SourceId,
    url: String,
    status: u16,
    body_bytes: usize,
    elapsed_ms: u64,
    health: AdapterHealth,
    stats: Option<SourceStats>,
}

pub async fn run(
    args: &ProbeArgs,
    resilience: &Arc<Resilience>,
    http: Arc<dyn HttpClient>,
) -> Result<CommandResult, CliError> {
    let source = args.source.parse::<SourceId>()?;
    let mut client = SourceClient::for_source(source, http, resilience.clone())
        .with_retry_policy(RetryPolicy::exponential(args.retries));
    if let Some(timeout_ms) = args.timeout_ms {
        client = client.with_timeout(Duration::from_millis(timeout_ms));
    }

    let mut request = HttpRequest::get(&args.url);
    if source == SourceId::SecEdgar {
        request = request.with_header("user-agent", &resilience.settings().sec_user_agent);
    }

    let started = Instant::now();
    let response = client.request(request).await?;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(source = %source, status = response.status, elapsed_ms, "probe finished");

    let data = serde_json::to_value(ProbeResponseData {
        source,
        url: args.url.clone(),
        status: response.status,
        body_bytes: response.body.len(),
        elapsed_ms,
        health: client.health_check(),
        stats: resilience
            .sources()
            .get(source.as_str())
            .map(|metrics| metrics.stats()),
    })?;
    Ok(CommandResult::ok(data))
}

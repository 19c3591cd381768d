use serde::Serialize;

use openterm_core::{Resilience, SourceId};

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SourceEntry {
    source: SourceId,
    enabled: bool,
    requests_per_minute: f64,
    tokens_available: f64,
    failure_threshold: u32,
    recovery_timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct SourcesResponseData {
    sources: Vec<SourceEntry>,
}

pub fn run(resilience: &Resilience) -> Result<CommandResult, CliError> {
    let settings = resilience.settings();
    let sources = SourceId::ALL
        .into_iter()
        .map(|source| {
            let policy = settings.circuit_policy(source);
            let limit = resilience.rate_limiter().limit(source.as_str());
            SourceEntry {
                source,
                enabled: settings.is_enabled(source),
                requests_per_minute: settings.requests_per_minute(source),
                tokens_available: limit.map_or(0.0, |limit| limit.available),
                failure_threshold: policy.failure_threshold,
                recovery_timeout_secs: policy.recovery_timeout.as_secs(),
            }
        })
        .collect::<Vec<_>>();

    let data = serde_json::to_value(SourcesResponseData { sources })?;
    Ok(CommandResult::ok(data))
}

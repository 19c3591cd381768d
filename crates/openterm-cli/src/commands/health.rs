use std::sync::Arc;

use openterm_core::{HealthReport, HttpClient, Resilience, SourceClient, SourceId};

use crate::error::CliError;

use super::CommandResult;

/// Health of the sources this process would call. Connectivity reflects the
/// clients' own history, which is empty in a fresh process.
pub fn run(
    resilience: &Arc<Resilience>,
    http: &Arc<dyn HttpClient>,
) -> Result<CommandResult, CliError> {
    let clients = SourceId::ALL
        .into_iter()
        .filter(|source| resilience.settings().is_enabled(*source))
        .map(|source| SourceClient::for_source(source, http.clone(), resilience.clone()))
        .collect::<Vec<_>>();
    let clients = clients.iter().collect::<Vec<_>>();

    let report = HealthReport::build(resilience, &clients);
    let data = serde_json::to_value(report)?;
    Ok(CommandResult::ok(data))
}

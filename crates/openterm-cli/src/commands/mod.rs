mod health;
mod probe;
mod ready;
mod sources;

use std::sync::Arc;

use openterm_core::{
    HttpClient, NoopHttpClient, ReqwestHttpClient, Resilience, ResilienceSettings, SystemClock,
};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub exit_code: u8,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self { data, exit_code: 0 }
    }

    pub fn with_exit_code(mut self, exit_code: u8) -> Self {
        self.exit_code = exit_code;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let settings = ResilienceSettings::from_env()?;
    let http: Arc<dyn HttpClient> = if cli.mock {
        Arc::new(NoopHttpClient)
    } else {
        Arc::new(ReqwestHttpClient::with_user_agent(&settings.sec_user_agent))
    };
    let resilience = Arc::new(Resilience::from_settings(settings, Arc::new(SystemClock)));

    match &cli.command {
        Command::Sources => sources::run(&resilience),
        Command::Health => health::run(&resilience, &http),
        Command::Ready => ready::run(&resilience),
        Command::Probe(args) => probe::run(args, &resilience, http).await,
    }
}

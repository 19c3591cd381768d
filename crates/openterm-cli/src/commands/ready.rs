use openterm_core::{Readiness, Resilience};

use crate::error::CliError;

use super::CommandResult;

pub fn run(resilience: &Resilience) -> Result<CommandResult, CliError> {
    let readiness = Readiness::evaluate(resilience);
    let exit_code = if readiness.is_ready() { 0 } else { 1 };

    let data = serde_json::to_value(readiness)?;
    Ok(CommandResult::ok(data).with_exit_code(exit_code))
}

use std::io::{self, Write};

use serde::Serialize;

use crate::error::CliError;

pub fn render<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{payload}")?;
    Ok(())
}

use std::io::Write;

use serde::Serialize;

use crate::error::CliError;

/// Write `value` to stdout as one JSON document.
pub fn render<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    if pretty {
        serde_json::to_writer_pretty(&mut handle, value)?;
    } else {
        serde_json::to_writer(&mut handle, value)?;
    }
    writeln!(handle)?;
    Ok(())
}

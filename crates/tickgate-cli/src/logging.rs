//! Tracing subscriber setup. Logs go to stderr; stdout carries JSON output.

use clap::ValueEnum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::CliError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable with colors.
    Pretty,
    /// One JSON object per event.
    Json,
    #[default]
    Compact,
}

/// Install the global subscriber. Level comes from `RUST_LOG`, default `info`.
pub fn init_logging(format: LogFormat) -> Result<(), CliError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| CliError::Command(format!("failed to install logger: {e}")))
}

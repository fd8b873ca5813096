mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;
use std::process::ExitCode;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_format)?;

    let outcome = commands::run(&cli).await?;
    output::render(&outcome.data, cli.pretty)?;
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }

    Ok(ExitCode::from(outcome.exit_code))
}

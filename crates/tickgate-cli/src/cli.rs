//! CLI argument definitions for tickgate.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Execute one pipeline run and print the result |
//! | `schedule start` | Run the scheduler in the foreground |
//! | `schedule stop` | Ask a running scheduler to stop |
//! | `schedule status` | Show the scheduler state |
//! | `status` | Freshness and storage health |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$TICKGATE_HOME/tickgate.toml` | Pipeline configuration file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-format` | `compact` | Log format on stderr (pretty, json, compact) |
//! | `--mock` | `false` | Serve every provider from generated fixtures |
//!
//! # Examples
//!
//! ```bash
//! tickgate run --mock --pretty
//! tickgate run --mode backfill --start 2025-01-02 --end 2025-03-31
//! tickgate schedule start --cron "0 22 * * 1-5"
//! tickgate status
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tickgate_core::{parse_date, RunMode};
use time::Date;

use crate::logging::LogFormat;

/// Tickgate - quality-gated market data pipeline
#[derive(Debug, Parser)]
#[command(
    name = "tickgate",
    author,
    version,
    about = "Quality-gated market data pipeline",
    long_about = "Tickgate fetches daily series from several providers, validates and \
cross-checks them, and stores only batches that pass the quality gate.\n\
\n\
Use 'tickgate <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Pipeline configuration file (TOML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log output format. Level is controlled by RUST_LOG.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Replace HTTP providers with generated fixture series.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute one pipeline run.
    ///
    /// Prints the run result as JSON. Exit code 0 on success or partial
    /// success, 1 when the run failed.
    ///
    /// # Examples
    ///
    ///   tickgate run
    ///   tickgate run --mode full-refresh
    ///   tickgate run --mode backfill --start 2025-01-02 --end 2025-03-31
    Run(RunArgs),

    /// Background scheduler.
    Schedule(ScheduleArgs),

    /// Show freshness per instrument and provider plus storage health.
    Status(StatusArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Incremental,
    FullRefresh,
    Backfill,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Incremental => Self::Incremental,
            ModeArg::FullRefresh => Self::FullRefresh,
            ModeArg::Backfill => Self::Backfill,
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long, value_enum, default_value_t = ModeArg::Incremental)]
    pub mode: ModeArg,

    /// First date (YYYY-MM-DD). Required for backfill.
    #[arg(long, value_parser = parse_date)]
    pub start: Option<Date>,

    /// Last date (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(long, value_parser = parse_date)]
    pub end: Option<Date>,
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub command: ScheduleCommand,
}

#[derive(Debug, Subcommand)]
pub enum ScheduleCommand {
    /// Run the scheduler until Ctrl-C or `schedule stop`.
    Start(ScheduleStartArgs),
    /// Ask the running scheduler to stop.
    Stop,
    /// Print `{running, next_run_time}` of the scheduler.
    Status,
}

#[derive(Debug, Args)]
pub struct ScheduleStartArgs {
    /// Five-field cron expression (UTC). Defaults to the configured cadence.
    #[arg(long)]
    pub cron: Option<String>,

    /// Trigger one run immediately before waiting for the schedule.
    #[arg(long, default_value_t = false)]
    pub run_now: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Include the last N quality outcomes per pair.
    #[arg(long, default_value_t = 0)]
    pub history: usize,
}

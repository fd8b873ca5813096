use serde::Serialize;
use serde_json::Value;
use tickgate_core::{FreshnessRecord, HealthReport};
use tickgate_warehouse::QualityTrendPoint;

use crate::cli::StatusArgs;
use crate::error::CliError;

use super::{CommandOutcome, Context};

#[derive(Debug, Serialize)]
struct StatusResponse {
    health: HealthReport,
    freshness: Vec<FreshnessRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    history: Vec<PairHistory>,
}

#[derive(Debug, Serialize)]
struct PairHistory {
    instrument: String,
    provider: String,
    points: Vec<QualityTrendPoint>,
}

pub fn run(context: &Context, args: &StatusArgs) -> Result<CommandOutcome, CliError> {
    let warehouse = context.open_warehouse()?;
    let monitor = context.monitor(warehouse.clone());

    let health = monitor.health();
    let freshness = monitor.freshness();

    let mut history = Vec::new();
    if args.history > 0 {
        for record in &freshness {
            let points = warehouse.quality_history(
                record.instrument.as_str(),
                record.provider.as_str(),
                args.history,
            )?;
            history.push(PairHistory {
                instrument: record.instrument.to_string(),
                provider: record.provider.to_string(),
                points,
            });
        }
    }

    let stale: Vec<String> = freshness
        .iter()
        .filter(|record| record.stale)
        .map(|record| format!("{}/{}", record.instrument, record.provider))
        .collect();

    let data: Value = serde_json::to_value(StatusResponse {
        health,
        freshness,
        history,
    })?;
    let mut outcome = CommandOutcome::ok(data);
    if !health.storage_reachable {
        outcome = outcome.with_warning("storage is unreachable").with_exit_code(1);
    }
    if !stale.is_empty() {
        outcome = outcome.with_warning(format!("stale series: {}", stale.join(", ")));
    }
    Ok(outcome)
}

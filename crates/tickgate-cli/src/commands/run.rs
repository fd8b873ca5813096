//! One-shot pipeline run.

use time::{Date, OffsetDateTime};
use tickgate_core::{CancelFlag, DateRange, RunMode, RunRequest, RunStatus};

use crate::cli::RunArgs;
use crate::error::CliError;

use super::{CommandOutcome, Context};

pub async fn run(context: &Context, args: &RunArgs) -> Result<CommandOutcome, CliError> {
    let mode = RunMode::from(args.mode);
    let today = OffsetDateTime::now_utc().date();
    let range = resolve_range(mode, args.start, args.end, context.config.orchestrator.history_start, today)?;
    let request = RunRequest::new(
        context.config.instrument_ids(),
        context.config.provider_ids(),
        range,
        mode,
    );

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, letting started fetches finish");
            on_interrupt.cancel();
        }
    });

    let orchestrator = context.orchestrator(context.open_warehouse()?)?;
    let result = orchestrator.run(&request, &cancel).await;
    interrupt.abort();

    // Wait for delivery so alerts are not lost when the process exits.
    if let Err(error) = context.notifier().notify(&result).await {
        tracing::warn!(%error, "notification task failed");
    }

    let data = serde_json::to_value(&result)?;
    let outcome = match result.status {
        RunStatus::Success => CommandOutcome::ok(data),
        RunStatus::Partial => CommandOutcome::ok(data).with_warning(format!(
            "run {} finished partially: {} of {} pairs failed",
            result.run_id,
            result.error_count(),
            result.outcomes.len()
        )),
        RunStatus::Failure => CommandOutcome::ok(data).with_exit_code(1),
    };
    Ok(outcome)
}

/// Dates for a run.
///
/// Backfill needs both `start` and `end`. The other modes run from the
/// configured history start (or `start`) to `end` (or today).
fn resolve_range(
    mode: RunMode,
    start: Option<Date>,
    end: Option<Date>,
    history_start: Date,
    today: Date,
) -> Result<DateRange, CliError> {
    let (start, end) = match mode {
        RunMode::Backfill => match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => return Err(CliError::Usage("backfill requires --start and --end".into())),
        },
        RunMode::Incremental | RunMode::FullRefresh => {
            (start.unwrap_or(history_start), end.unwrap_or(today))
        }
    };
    Ok(DateRange::new(start, end)?)
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn backfill_requires_explicit_dates() {
        let error = resolve_range(
            RunMode::Backfill,
            Some(date!(2026 - 01 - 05)),
            None,
            date!(2024 - 01 - 02),
            date!(2026 - 03 - 02),
        )
        .expect_err("missing end");
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn incremental_defaults_to_history_through_today() {
        let range = resolve_range(
            RunMode::Incremental,
            None,
            None,
            date!(2024 - 01 - 02),
            date!(2026 - 03 - 02),
        )
        .expect("range");
        assert_eq!(range.start, date!(2024 - 01 - 02));
        assert_eq!(range.end, date!(2026 - 03 - 02));
    }

    #[test]
    fn inverted_dates_are_rejected() {
        let error = resolve_range(
            RunMode::FullRefresh,
            Some(date!(2026 - 03 - 05)),
            Some(date!(2026 - 03 - 01)),
            date!(2024 - 01 - 02),
            date!(2026 - 03 - 02),
        )
        .expect_err("inverted");
        assert!(matches!(error, CliError::Validation(_)));
    }
}

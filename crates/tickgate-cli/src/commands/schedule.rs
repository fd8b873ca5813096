//! Foreground scheduler and its control files.
//!
//! `schedule start` publishes its status to `$TICKGATE_HOME/scheduler.json`
//! every second and exits when `$TICKGATE_HOME/scheduler.stop` appears.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tickgate_core::{Scheduler, SchedulerStatus};

use crate::cli::ScheduleStartArgs;
use crate::error::CliError;

use super::{CommandOutcome, Context};

const STATE_FILE: &str = "scheduler.json";
const STOP_FILE: &str = "scheduler.stop";
const PUBLISH_INTERVAL: Duration = Duration::from_secs(1);
/// A state file older than this belongs to a scheduler that is gone.
const STALE_AFTER_SECS: i64 = 10;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    pid: u32,
    trigger: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
    status: SchedulerStatus,
}

fn state_path(home: &Path) -> PathBuf {
    home.join(STATE_FILE)
}

fn stop_path(home: &Path) -> PathBuf {
    home.join(STOP_FILE)
}

fn publish(home: &Path, scheduler: &Scheduler) -> Result<(), CliError> {
    let state = StateFile {
        pid: std::process::id(),
        trigger: scheduler.trigger_description(),
        updated_at: OffsetDateTime::now_utc(),
        status: scheduler.status(),
    };
    let path = state_path(home);
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, serde_json::to_vec_pretty(&state)?)?;
    fs::rename(&temp, &path)?;
    Ok(())
}

pub async fn start(context: &Context, args: &ScheduleStartArgs) -> Result<CommandOutcome, CliError> {
    let cron = args.cron.as_deref().unwrap_or(&context.config.scheduler.cron);
    let scheduler = Scheduler::new(Arc::new(context.runner(context.open_warehouse()?)?));
    scheduler.start_cron(cron)?;

    let stop_file = stop_path(&context.home);
    if stop_file.exists() {
        fs::remove_file(&stop_file)?;
    }
    if args.run_now {
        scheduler.fire();
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(PUBLISH_INTERVAL);
    let reason = loop {
        tokio::select! {
            _ = &mut ctrl_c => break "interrupt",
            _ = ticker.tick() => {
                publish(&context.home, &scheduler)?;
                if stop_file.exists() {
                    fs::remove_file(&stop_file)?;
                    break "stop request";
                }
            }
        }
    };

    tracing::info!(reason, "stopping scheduler");
    scheduler.stop();
    scheduler.wait_idle().await;
    publish(&context.home, &scheduler)?;

    let mut data = json!({ "stopped": true, "reason": reason });
    data["status"] = serde_json::to_value(scheduler.status())?;
    Ok(CommandOutcome::ok(data))
}

pub fn stop(context: &Context) -> Result<CommandOutcome, CliError> {
    let running = read_state(&context.home)?.is_some_and(|state| state.status.running);
    fs::write(stop_path(&context.home), b"stop\n")?;
    let outcome = CommandOutcome::ok(json!({ "stop_requested": true }));
    if running {
        Ok(outcome)
    } else {
        Ok(outcome.with_warning("no running scheduler found; the request will stop the next one to check"))
    }
}

pub fn status(context: &Context) -> Result<CommandOutcome, CliError> {
    let data = match read_state(&context.home)? {
        Some(state) => {
            let mut data = serde_json::to_value(&state.status)?;
            data["trigger"] = json!(state.trigger);
            data["pid"] = json!(state.pid);
            data
        }
        None => json!({ "running": false, "next_run_time": null }),
    };
    Ok(CommandOutcome::ok(data))
}

/// Current state, or `None` if no scheduler has published recently.
fn read_state(home: &Path) -> Result<Option<StateFile>, CliError> {
    let path = state_path(home);
    if !path.is_file() {
        return Ok(None);
    }
    let state: StateFile = serde_json::from_slice(&fs::read(&path)?)?;
    let age = OffsetDateTime::now_utc() - state.updated_at;
    if state.status.running && age.whole_seconds() > STALE_AFTER_SECS {
        tracing::debug!(age_secs = age.whole_seconds(), "ignoring stale scheduler state");
        return Ok(None);
    }
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn state(running: bool, updated_at: OffsetDateTime) -> StateFile {
        StateFile {
            pid: 4242,
            trigger: Some("cron '@daily' (UTC)".to_string()),
            updated_at,
            status: SchedulerStatus {
                running,
                next_run_time: None,
                run_in_progress: false,
                last_run: None,
            },
        }
    }

    fn write(home: &Path, state: &StateFile) {
        fs::write(state_path(home), serde_json::to_vec(state).expect("json")).expect("write");
    }

    #[test]
    fn missing_state_file_means_no_scheduler() {
        let temp = tempdir().expect("tempdir");
        assert!(read_state(temp.path()).expect("read").is_none());
    }

    #[test]
    fn recent_state_is_reported() {
        let temp = tempdir().expect("tempdir");
        write(temp.path(), &state(true, OffsetDateTime::now_utc()));

        let found = read_state(temp.path()).expect("read").expect("state");
        assert_eq!(found.pid, 4242);
        assert!(found.status.running);
    }

    #[test]
    fn running_state_that_stopped_publishing_is_ignored() {
        let temp = tempdir().expect("tempdir");
        let old = OffsetDateTime::now_utc() - time::Duration::minutes(5);
        write(temp.path(), &state(true, old));
        assert!(read_state(temp.path()).expect("read").is_none());

        // A cleanly stopped scheduler stays visible however old it is.
        write(temp.path(), &state(false, old));
        assert!(read_state(temp.path()).expect("read").is_some());
    }
}

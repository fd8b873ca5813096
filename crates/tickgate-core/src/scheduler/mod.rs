//! Background trigger for incremental runs.
//!
//! A [`Scheduler`] owns one loop task that sleeps until the [`Trigger`]'s next
//! fire time and then calls [`Scheduler::fire`]. Runs never overlap: a fire
//! that lands while a run is in progress is skipped and logged, not queued.

mod cron;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::notifier::Notifier;
use crate::orchestrator::{CancelFlag, Orchestrator, PipelineRunResult, RunMode, RunRequest, RunStatus};
use crate::{ConfigurationError, DateRange, InstrumentId, ProviderId};

pub use cron::CronTrigger;

/// Default cadence: once a day at midnight UTC.
pub const DEFAULT_CRON: &str = "@daily";

/// Source of fire times.
pub trait Trigger: Send + Sync {
    /// First fire time strictly after `now`, or `None` if the schedule is
    /// exhausted.
    fn next_fire_time(&self, now: OffsetDateTime) -> Option<OffsetDateTime>;

    fn describe(&self) -> String;
}

/// Fires every `every` from the moment it is asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTrigger {
    every: Duration,
}

impl IntervalTrigger {
    pub fn new(every: Duration) -> Result<Self, ConfigurationError> {
        if every.is_zero() {
            return Err(ConfigurationError::invalid("interval", "must be greater than zero"));
        }
        Ok(Self { every })
    }
}

impl Trigger for IntervalTrigger {
    fn next_fire_time(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        now.checked_add(time::Duration::try_from(self.every).ok()?)
    }

    fn describe(&self) -> String {
        format!("every {}ms", self.every.as_millis())
    }
}

pub type RunFuture<'a> = Pin<Box<dyn Future<Output = PipelineRunResult> + Send + 'a>>;

/// "Run incremental now". The production handler is [`PipelineRunner`].
pub trait RunHandler: Send + Sync {
    fn run_incremental<'a>(&'a self, cancel: CancelFlag) -> RunFuture<'a>;
}

/// Runs the orchestrator over every tracked pair from `history_start` to today
/// and hands the result to the notifier.
pub struct PipelineRunner {
    orchestrator: Arc<Orchestrator>,
    instruments: Vec<InstrumentId>,
    providers: Vec<ProviderId>,
    history_start: Date,
    notifier: Option<Notifier>,
}

impl PipelineRunner {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        instruments: Vec<InstrumentId>,
        providers: Vec<ProviderId>,
        history_start: Date,
    ) -> Self {
        Self {
            orchestrator,
            instruments,
            providers,
            history_start,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn request_for(&self, mode: RunMode, today: Date) -> RunRequest {
        RunRequest::new(
            self.instruments.clone(),
            self.providers.clone(),
            DateRange::ending_at(self.history_start, today),
            mode,
        )
    }

    /// Run with `request` and notify. Shared by the scheduler and the CLI.
    pub async fn execute(&self, request: &RunRequest, cancel: &CancelFlag) -> PipelineRunResult {
        let result = self.orchestrator.run(request, cancel).await;
        if let Some(notifier) = &self.notifier {
            // Delivery runs detached; the run result does not wait on it.
            drop(notifier.notify(&result));
        }
        result
    }
}

impl RunHandler for PipelineRunner {
    fn run_incremental<'a>(&'a self, cancel: CancelFlag) -> RunFuture<'a> {
        Box::pin(async move {
            let request = self.request_for(RunMode::Incremental, OffsetDateTime::now_utc().date());
            self.execute(&request, &cancel).await
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started,
    /// A run was already in progress.
    Skipped,
}

/// Summary of the most recent finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    pub run_id: Uuid,
    pub status: RunStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_run_time: Option<OffsetDateTime>,
    pub run_in_progress: bool,
    pub last_run: Option<LastRun>,
}

#[derive(Default)]
struct SchedulerState {
    loop_task: Option<JoinHandle<()>>,
    trigger: Option<String>,
    next_run_time: Option<OffsetDateTime>,
    in_flight: Option<CancelFlag>,
    last_run: Option<LastRun>,
}

struct Inner {
    handler: Arc<dyn RunHandler>,
    state: Mutex<SchedulerState>,
    busy: watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the busy flag when a run ends, including by panic.
struct BusyGuard(Arc<Inner>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.lock().in_flight = None;
        self.0.busy.send_replace(false);
    }
}

/// Cadence-driven, non-overlapping run trigger. Clones share one scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(handler: Arc<dyn RunHandler>) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                handler,
                state: Mutex::new(SchedulerState::default()),
                busy,
            }),
        }
    }

    /// Start the loop on a cron expression.
    pub fn start_cron(&self, expression: &str) -> Result<(), ConfigurationError> {
        self.start(CronTrigger::parse(expression)?);
        Ok(())
    }

    /// Start the loop, replacing any loop already running. Must be called
    /// inside a tokio runtime.
    pub fn start(&self, trigger: impl Trigger + 'static) {
        let description = trigger.describe();
        let scheduler = self.clone();
        // Held across the spawn so the loop cannot publish state before its
        // handle is recorded.
        let mut state = self.inner.lock();
        let task = tokio::spawn(async move { scheduler.run_loop(trigger).await });
        if let Some(previous) = state.loop_task.replace(task) {
            previous.abort();
            tracing::info!("replaced running schedule");
        }
        tracing::info!(trigger = %description, "scheduler started");
        state.trigger = Some(description);
    }

    async fn run_loop(self, trigger: impl Trigger) {
        loop {
            let now = OffsetDateTime::now_utc();
            let Some(next) = trigger.next_fire_time(now) else {
                tracing::warn!(trigger = %trigger.describe(), "schedule has no further fire times");
                let mut state = self.inner.lock();
                state.next_run_time = None;
                state.loop_task = None;
                state.trigger = None;
                return;
            };
            self.inner.lock().next_run_time = Some(next);
            tracing::debug!(next_run_time = %next, "waiting for next fire");

            tokio::time::sleep((next - now).max(time::Duration::ZERO).unsigned_abs()).await;
            self.fire();
        }
    }

    /// Trigger one run in the background unless one is already in progress.
    pub fn fire(&self) -> FireOutcome {
        match self.launch() {
            Some(_) => FireOutcome::Started,
            None => {
                tracing::warn!("run still in progress, skipping scheduled fire");
                FireOutcome::Skipped
            }
        }
    }

    /// Run immediately and wait for the result. `None` when a run is already
    /// in progress.
    pub async fn run_now(&self) -> Option<PipelineRunResult> {
        let handle = self.launch()?;
        match handle.await {
            Ok(result) => Some(result),
            Err(error) => {
                tracing::error!(%error, "run task failed");
                None
            }
        }
    }

    fn launch(&self) -> Option<JoinHandle<PipelineRunResult>> {
        let claimed = self.inner.busy.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if !claimed {
            return None;
        }

        let cancel = CancelFlag::new();
        self.inner.lock().in_flight = Some(cancel.clone());
        let guard = BusyGuard(Arc::clone(&self.inner));
        Some(tokio::spawn(async move {
            let inner = Arc::clone(&guard.0);
            let result = inner.handler.run_incremental(cancel).await;
            tracing::info!(run_id = %result.run_id, status = %result.status, "scheduled run finished");
            inner.lock().last_run = Some(LastRun {
                run_id: result.run_id,
                status: result.status,
                finished_at: result.finished_at,
            });
            drop(guard);
            result
        }))
    }

    /// Stop the loop and cancel the in-flight run. Tasks of that run that
    /// already started are allowed to finish.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if let Some(task) = state.loop_task.take() {
            task.abort();
        }
        if let Some(cancel) = &state.in_flight {
            cancel.cancel();
        }
        state.next_run_time = None;
        state.trigger = None;
        tracing::info!("scheduler stopped");
    }

    pub fn status(&self) -> SchedulerStatus {
        let run_in_progress = *self.inner.busy.borrow();
        let state = self.inner.lock();
        SchedulerState::status(&state, run_in_progress)
    }

    pub fn trigger_description(&self) -> Option<String> {
        self.inner.lock().trigger.clone()
    }

    /// Resolve once no run is in progress.
    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy.subscribe();
        // The sender lives in `inner`, so the channel cannot close here.
        let _ = busy.wait_for(|busy| !*busy).await;
    }
}

impl SchedulerState {
    fn status(&self, run_in_progress: bool) -> SchedulerStatus {
        SchedulerStatus {
            running: self.loop_task.is_some(),
            next_run_time: self.next_run_time,
            run_in_progress,
            last_run: self.last_run.clone(),
        }
    }
}

//! # Orchestrator
//!
//! Drives `fetch -> validate -> score -> gate -> store` for every
//! `(instrument, provider)` pair of a run.
//!
//! Fetch tasks are the only parallel stage: they run on a semaphore-bounded
//! [`JoinSet`]. Each task fetches (through the run cache, the provider's
//! request budget, the retry policy and a per-task timeout) and validates its
//! own batch. Once every task for an instrument has reported, cross-source
//! consistency, scoring, gating and storage run for that instrument.
//!
//! Per-pair failures are captured as [`PairError`]s and never abort the run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Date, OffsetDateTime};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheKey, RunCache};
use crate::quality::{GateDecision, QualityGate, QualityReport, QualityScorer};
use crate::retry::{retry, RetryPolicy};
use crate::source::{ConnectorRegistry, FetchError, FetchRequest, SourceConnector};
use crate::storage::Storage;
use crate::throttling::RequestBudget;
use crate::validation::{ConsistencyOutcome, ValidationOutcome, Validator};
use crate::{
    ConfigurationError, DateRange, InstrumentId, ObservationBatch, ProviderId, ProviderProfile,
};

/// How a run chooses each pair's fetch window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// From the latest stored date minus the lookback, to the range end.
    Incremental,
    /// The entire configured history.
    FullRefresh,
    /// Exactly the requested range.
    Backfill,
}

impl RunMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::FullRefresh => "full-refresh",
            Self::Backfill => "backfill",
        }
    }
}

impl Display for RunMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "incremental" => Ok(Self::Incremental),
            "full-refresh" | "full_refresh" => Ok(Self::FullRefresh),
            "backfill" => Ok(Self::Backfill),
            other => Err(ConfigurationError::invalid(
                "mode",
                format!("unknown run mode '{other}'"),
            )),
        }
    }
}

/// Overall run verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failure,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation shared between a run and whoever may stop it.
///
/// Tasks that already started finish; pairs that have not started are
/// recorded as [`PairError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub instruments: Vec<InstrumentId>,
    pub providers: Vec<ProviderId>,
    /// Backfill and full refresh fetch exactly this range. Incremental runs
    /// end at `range.end` and fall back to `range.start` for pairs with no
    /// stored data.
    pub range: DateRange,
    pub mode: RunMode,
}

impl RunRequest {
    pub fn new(
        instruments: Vec<InstrumentId>,
        providers: Vec<ProviderId>,
        range: DateRange,
        mode: RunMode,
    ) -> Self {
        Self {
            instruments,
            providers,
            range,
            mode,
        }
    }
}

/// Terminal error for one pair.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PairError {
    #[error("fetch failed: {error}")]
    Fetch { error: FetchError },

    #[error("fetch timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("invalid batch: {message}")]
    InvalidBatch { message: String },

    #[error("storage failed: {message}")]
    Storage { message: String },

    #[error("unsupported pair: {reason}")]
    Unsupported { reason: String },

    #[error("cancelled before the fetch started")]
    Cancelled,
}

impl PairError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Timeout { .. } => "timeout",
            Self::InvalidBatch { .. } => "invalid_batch",
            Self::Storage { .. } => "storage",
            Self::Unsupported { .. } => "unsupported",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result for one `(instrument, provider)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairOutcome {
    pub instrument: InstrumentId,
    pub provider: ProviderId,
    /// Window actually requested for this pair.
    pub range: DateRange,
    pub fetched: usize,
    /// Rows written (new or overwritten).
    pub stored: usize,
    /// Rows whose key did not exist before.
    pub new_rows: usize,
    pub report: Option<QualityReport>,
    pub decision: Option<GateDecision>,
    pub error: Option<PairError>,
}

impl PairOutcome {
    fn failed(instrument: InstrumentId, provider: ProviderId, range: DateRange, error: PairError) -> Self {
        Self {
            instrument,
            provider,
            range,
            fetched: 0,
            stored: 0,
            new_rows: 0,
            report: None,
            decision: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregated result of one run. Recorded for audit after every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunResult {
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub mode: RunMode,
    pub range: DateRange,
    pub outcomes: Vec<PairOutcome>,
    pub status: RunStatus,
}

impl PipelineRunResult {
    pub fn total_fetched(&self) -> usize {
        self.outcomes.iter().map(|o| o.fetched).sum()
    }

    pub fn total_stored(&self) -> usize {
        self.outcomes.iter().map(|o| o.stored).sum()
    }

    pub fn total_new_rows(&self) -> usize {
        self.outcomes.iter().map(|o| o.new_rows).sum()
    }

    pub fn error_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_error()).count()
    }

    pub fn outcome(&self, instrument: &InstrumentId, provider: &ProviderId) -> Option<&PairOutcome> {
        self.outcomes
            .iter()
            .find(|o| &o.instrument == instrument && &o.provider == provider)
    }
}

/// Derive the overall status.
///
/// `failure` when every pair errored or nothing was stored; `partial` when
/// some pair errored or was rejected by the gate; `success` otherwise.
pub fn derive_status(outcomes: &[PairOutcome]) -> RunStatus {
    let stored: usize = outcomes.iter().map(|o| o.stored).sum();
    if outcomes.is_empty() || outcomes.iter().all(PairOutcome::is_error) || stored == 0 {
        return RunStatus::Failure;
    }
    let degraded = outcomes.iter().any(|o| {
        o.is_error() || o.decision.is_some_and(|decision| !decision.is_accept())
    });
    if degraded {
        RunStatus::Partial
    } else {
        RunStatus::Success
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorConfig {
    pub worker_pool_size: usize,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
    /// Days re-fetched before the latest stored date in incremental mode.
    pub lookback_days: u32,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 3,
            fetch_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            lookback_days: 30,
            cache_ttl: Duration::from_secs(15 * 60),
            cache_max_entries: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigurationError::invalid("worker_pool_size", "must be at least 1"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigurationError::invalid("fetch_timeout_secs", "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid("retry.attempts", "must be at least 1"));
        }
        Ok(())
    }
}

/// What a fetch task hands back.
struct TaskReport {
    instrument: InstrumentId,
    provider: ProviderId,
    range: DateRange,
    result: Result<FetchedBatch, PairError>,
}

struct FetchedBatch {
    batch: ObservationBatch,
    validation: ValidationOutcome,
}

/// Everything a fetch task needs, owned so the task can be `'static`.
struct FetchJob {
    provider: ProviderId,
    connector: Arc<dyn SourceConnector>,
    budget: Option<RequestBudget>,
    request: FetchRequest,
    validator: Arc<Validator>,
    cache: RunCache,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancelFlag,
    permits: Arc<Semaphore>,
}

/// Pipeline driver. Cheap to share behind an `Arc`.
pub struct Orchestrator {
    registry: ConnectorRegistry,
    profiles: BTreeMap<ProviderId, ProviderProfile>,
    budgets: BTreeMap<ProviderId, RequestBudget>,
    validator: Arc<Validator>,
    scorer: QualityScorer,
    gate: QualityGate,
    storage: Arc<dyn Storage>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: ConnectorRegistry,
        profiles: impl IntoIterator<Item = ProviderProfile>,
        validator: Validator,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let profiles: BTreeMap<ProviderId, ProviderProfile> = profiles
            .into_iter()
            .map(|profile| (profile.id.clone(), profile))
            .collect();
        let budgets = profiles
            .values()
            .map(|profile| (profile.id.clone(), RequestBudget::daily(profile)))
            .collect();

        Self {
            registry,
            profiles,
            budgets,
            validator: Arc::new(validator),
            scorer: QualityScorer::new(),
            gate: QualityGate::default(),
            storage,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_gate(mut self, gate: QualityGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Execute one run. Never fails as a whole: per-pair problems are
    /// recorded in the result.
    pub async fn run(&self, request: &RunRequest, cancel: &CancelFlag) -> PipelineRunResult {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "pipeline_run",
            %run_id,
            mode = %request.mode,
            range = %request.range
        );
        self.run_inner(run_id, request, cancel).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, request: &RunRequest, cancel: &CancelFlag) -> PipelineRunResult {
        let started_at = OffsetDateTime::now_utc();
        tracing::info!(
            instruments = request.instruments.len(),
            providers = request.providers.len(),
            "run started"
        );

        let cache = RunCache::new(self.config.cache_ttl, self.config.cache_max_entries);
        let permits = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));
        let mut tasks: JoinSet<TaskReport> = JoinSet::new();

        let mut outcomes: Vec<PairOutcome> = Vec::new();
        let mut pending: BTreeMap<InstrumentId, BTreeSet<ProviderId>> = BTreeMap::new();
        let mut reports: BTreeMap<InstrumentId, Vec<TaskReport>> = BTreeMap::new();

        for instrument in dedup(&request.instruments) {
            for provider in dedup(&request.providers) {
                match self.plan_pair(&instrument, &provider, request, cancel) {
                    Ok((connector, fetch_request)) => {
                        let job = self.job(&provider, connector, fetch_request, &cache, cancel, &permits);
                        pending.entry(instrument.clone()).or_default().insert(provider.clone());
                        let span = tracing::info_span!("pair", instrument = %instrument, provider = %provider);
                        tasks.spawn(run_job(job).instrument(span));
                    }
                    Err((range, error)) => {
                        tracing::warn!(%instrument, %provider, error = %error, "pair not fetched");
                        outcomes.push(PairOutcome::failed(instrument.clone(), provider.clone(), range, error));
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(error) => {
                    tracing::error!(%error, "fetch task aborted");
                    continue;
                }
            };

            let instrument = report.instrument.clone();
            let remaining = pending.get_mut(&instrument).map(|providers| {
                providers.remove(&report.provider);
                providers.len()
            });
            reports.entry(instrument.clone()).or_default().push(report);

            if remaining == Some(0) {
                pending.remove(&instrument);
                if let Some(done) = reports.remove(&instrument) {
                    outcomes.extend(self.finish_instrument(done));
                }
            }
        }

        // Instruments whose tasks aborted still get their finished pairs, and
        // the lost pairs are recorded.
        for (instrument, missing) in pending {
            for provider in missing {
                outcomes.push(PairOutcome::failed(
                    instrument.clone(),
                    provider,
                    request.range,
                    PairError::Cancelled,
                ));
            }
            if let Some(done) = reports.remove(&instrument) {
                outcomes.extend(self.finish_instrument(done));
            }
        }

        outcomes.sort_by(|a, b| (&a.instrument, &a.provider).cmp(&(&b.instrument, &b.provider)));
        let status = derive_status(&outcomes);
        let result = PipelineRunResult {
            run_id,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            mode: request.mode,
            range: request.range,
            outcomes,
            status,
        };

        tracing::info!(
            status = %result.status,
            fetched = result.total_fetched(),
            stored = result.total_stored(),
            new_rows = result.total_new_rows(),
            errors = result.error_count(),
            "run finished"
        );

        if let Err(error) = self.storage.record_run(&result) {
            tracing::warn!(%error, "failed to record run audit");
        }
        result
    }

    /// Resolve connector, capabilities, series key and window for a pair.
    fn plan_pair(
        &self,
        instrument: &InstrumentId,
        provider: &ProviderId,
        request: &RunRequest,
        cancel: &CancelFlag,
    ) -> Result<(Arc<dyn SourceConnector>, FetchRequest), (DateRange, PairError)> {
        let unsupported = |reason: String| (request.range, PairError::Unsupported { reason });

        let tracked = Validator::instrument(&self.validator, instrument)
            .ok_or_else(|| unsupported(format!("instrument '{instrument}' is not tracked")))?;
        let registered = self
            .registry
            .get(provider)
            .ok_or_else(|| unsupported(format!("no connector registered for '{provider}'")))?;

        let missing = registered.capabilities.missing_for(tracked);
        if !missing.is_empty() {
            let fields: Vec<&str> = missing.iter().map(|field| field.as_str()).collect();
            return Err(unsupported(format!(
                "'{provider}' cannot deliver required fields: {}",
                fields.join(", ")
            )));
        }

        let series_key = self
            .profiles
            .get(provider)
            .and_then(|profile| profile.series_key(instrument))
            .ok_or_else(|| unsupported(format!("'{provider}' has no series key for '{instrument}'")))?;

        let range = self
            .pair_range(instrument, provider, request)
            .map_err(|error| (request.range, error))?;

        if cancel.is_cancelled() {
            return Err((range, PairError::Cancelled));
        }

        Ok((
            Arc::clone(&registered.connector),
            FetchRequest::new(instrument.clone(), series_key, range),
        ))
    }

    fn pair_range(
        &self,
        instrument: &InstrumentId,
        provider: &ProviderId,
        request: &RunRequest,
    ) -> Result<DateRange, PairError> {
        match request.mode {
            RunMode::FullRefresh | RunMode::Backfill => Ok(request.range),
            RunMode::Incremental => {
                let latest = self
                    .storage
                    .latest_timestamp(instrument, provider)
                    .map_err(|error| PairError::Storage {
                        message: error.message().to_owned(),
                    })?;
                Ok(incremental_range(latest, request.range, self.config.lookback_days))
            }
        }
    }

    fn job(
        &self,
        provider: &ProviderId,
        connector: Arc<dyn SourceConnector>,
        request: FetchRequest,
        cache: &RunCache,
        cancel: &CancelFlag,
        permits: &Arc<Semaphore>,
    ) -> FetchJob {
        FetchJob {
            provider: provider.clone(),
            connector,
            budget: self.budgets.get(provider).cloned(),
            request,
            validator: Arc::clone(&self.validator),
            cache: cache.clone(),
            retry: self.config.retry,
            timeout: self.config.fetch_timeout,
            cancel: cancel.clone(),
            permits: Arc::clone(permits),
        }
    }

    /// Consistency, scoring, gating and storage for one instrument.
    fn finish_instrument(&self, reports: Vec<TaskReport>) -> Vec<PairOutcome> {
        let mut outcomes = Vec::with_capacity(reports.len());
        let mut fetched = Vec::new();

        for report in reports {
            match report.result {
                Ok(batch) => fetched.push((report.range, batch)),
                Err(error) => {
                    tracing::warn!(
                        instrument = %report.instrument,
                        provider = %report.provider,
                        error = %error,
                        "pair failed"
                    );
                    outcomes.push(PairOutcome::failed(
                        report.instrument,
                        report.provider,
                        report.range,
                        error,
                    ));
                }
            }
        }

        let comparable: Vec<&ObservationBatch> = fetched
            .iter()
            .filter(|(_, f)| f.validation.schema_passed())
            .map(|(_, f)| &f.batch)
            .collect();
        let comparisons = self.cross_source(&comparable);

        for (range, FetchedBatch { batch, validation }) in fetched {
            let consistency = worst_comparison(&comparisons, &batch.provider);
            let report = self.scorer.score(&validation, consistency);
            let decision = self.gate.admit(&report, None);
            tracing::info!(
                instrument = %batch.instrument,
                provider = %batch.provider,
                score = report.score,
                band = %report.band,
                decision = %decision,
                "batch scored"
            );

            let mut outcome = PairOutcome {
                instrument: batch.instrument.clone(),
                provider: batch.provider.clone(),
                range,
                fetched: batch.len(),
                stored: 0,
                new_rows: 0,
                report: Some(report),
                decision: Some(decision),
                error: None,
            };

            if decision.is_accept() {
                match self.storage.upsert(&batch.instrument, &batch.provider, &batch) {
                    Ok(summary) => {
                        outcome.stored = summary.stored;
                        outcome.new_rows = summary.new_rows;
                    }
                    Err(error) => {
                        tracing::error!(
                            instrument = %batch.instrument,
                            provider = %batch.provider,
                            %error,
                            "upsert failed"
                        );
                        outcome.error = Some(PairError::Storage {
                            message: error.message().to_owned(),
                        });
                    }
                }
            }
            outcomes.push(outcome);
        }

        outcomes
    }

    fn cross_source(&self, batches: &[&ObservationBatch]) -> Vec<ConsistencyOutcome> {
        let mut comparisons = Vec::new();
        for (i, a) in batches.iter().enumerate() {
            for b in &batches[i + 1..] {
                let outcome = self.validator.validate_cross_source(a, b, None);
                if outcome.violation {
                    tracing::warn!(
                        instrument = %outcome.instrument,
                        provider_a = %outcome.provider_a,
                        provider_b = %outcome.provider_b,
                        max_diff = outcome.max_diff,
                        "cross-source disagreement"
                    );
                }
                comparisons.push(outcome);
            }
        }
        comparisons
    }
}

/// The comparison with the largest `max_diff` that `provider` is part of.
/// Neutral comparisons only count when nothing else is available.
fn worst_comparison<'a>(
    comparisons: &'a [ConsistencyOutcome],
    provider: &ProviderId,
) -> Option<&'a ConsistencyOutcome> {
    let involved = comparisons.iter().filter(|c| c.involves(provider));
    let mut neutral = None;
    let mut worst: Option<&ConsistencyOutcome> = None;
    for comparison in involved {
        if comparison.is_neutral() {
            neutral = neutral.or(Some(comparison));
            continue;
        }
        if worst.map_or(true, |current| comparison.max_diff > current.max_diff) {
            worst = Some(comparison);
        }
    }
    worst.or(neutral)
}

/// Incremental window: latest stored date minus the lookback, clamped to
/// `bounds`. Pairs with nothing stored fetch all of `bounds`.
pub fn incremental_range(latest: Option<Date>, bounds: DateRange, lookback_days: u32) -> DateRange {
    let Some(latest) = latest else {
        return bounds;
    };
    let start = latest
        .checked_sub(time::Duration::days(i64::from(lookback_days)))
        .unwrap_or(bounds.start)
        .clamp(bounds.start, bounds.end);
    DateRange {
        start,
        end: bounds.end,
    }
}

fn dedup<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    let mut seen = BTreeSet::new();
    items.iter().filter(|item| seen.insert((*item).clone())).cloned().collect()
}

async fn run_job(job: FetchJob) -> TaskReport {
    let instrument = job.request.instrument.clone();
    let provider = job.provider.clone();
    let range = job.request.range;

    let result = execute_job(job).await;
    TaskReport {
        instrument,
        provider,
        range,
        result,
    }
}

async fn execute_job(job: FetchJob) -> Result<FetchedBatch, PairError> {
    // A closed semaphore never happens here; treat it like cancellation.
    let _permit = job
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| PairError::Cancelled)?;
    if job.cancel.is_cancelled() {
        return Err(PairError::Cancelled);
    }

    let key = CacheKey::new(&job.provider, &job.request);
    let batch = match job.cache.get(&key).await {
        Some(mut batch) => {
            // Another instrument on the same native series filled this entry.
            tracing::debug!(cached_for = %batch.instrument, "served from run cache");
            batch.instrument = job.request.instrument.clone();
            batch
        }
        None => {
            let batch = fetch_bounded(&job).await?;
            job.cache.put(key, batch.clone()).await;
            batch
        }
    };

    Validator::ensure_identity(&batch, &job.request.instrument, &job.provider)
        .map_err(|error| PairError::InvalidBatch {
            message: error.to_string(),
        })?;
    let validation = job
        .validator
        .validate(&batch, job.request.range)
        .map_err(|error| PairError::InvalidBatch {
            message: error.to_string(),
        })?;

    tracing::debug!(
        fetched = batch.len(),
        schema_passed = validation.schema_passed(),
        "batch validated"
    );
    Ok(FetchedBatch { batch, validation })
}

/// Retry inside the task's timeout; each attempt spends request budget.
async fn fetch_bounded(job: &FetchJob) -> Result<ObservationBatch, PairError> {
    let attempt = retry(&job.retry, FetchError::retryable, |_| async move {
        if let Some(budget) = &job.budget {
            if !budget.try_acquire() {
                return Err(FetchError::budget_exhausted(&job.provider));
            }
        }
        job.connector.fetch(job.request.clone()).await
    });

    match tokio::time::timeout(job.timeout, attempt).await {
        Ok(Ok(batch)) => Ok(batch),
        Ok(Err(error)) => Err(PairError::Fetch { error }),
        Err(_) => Err(PairError::Timeout {
            seconds: job.timeout.as_secs().max(1),
        }),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn range() -> DateRange {
        DateRange::new(date!(2025 - 01 - 01), date!(2026 - 03 - 31)).expect("range")
    }

    #[test]
    fn incremental_range_looks_back_from_latest() {
        let window = incremental_range(Some(date!(2026 - 03 - 20)), range(), 30);
        assert_eq!(window.start, date!(2026 - 02 - 18));
        assert_eq!(window.end, date!(2026 - 03 - 31));
    }

    #[test]
    fn incremental_range_without_history_uses_bounds() {
        assert_eq!(incremental_range(None, range(), 30), range());
    }

    #[test]
    fn incremental_range_is_clamped_to_bounds() {
        let window = incremental_range(Some(date!(2025 - 01 - 10)), range(), 30);
        assert_eq!(window.start, date!(2025 - 01 - 01));

        let future = incremental_range(Some(date!(2027 - 01 - 01)), range(), 30);
        assert_eq!(future.start, date!(2026 - 03 - 31));
    }

    #[test]
    fn run_mode_parses_cli_spellings() {
        assert_eq!("full-refresh".parse::<RunMode>().expect("mode"), RunMode::FullRefresh);
        assert_eq!("Backfill".parse::<RunMode>().expect("mode"), RunMode::Backfill);
        assert!("weekly".parse::<RunMode>().is_err());
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        assert_eq!(dedup(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }
}

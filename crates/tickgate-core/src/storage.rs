//! Storage collaborator.
//!
//! The orchestrator and monitor only talk to [`Storage`]. The DuckDB
//! [`Warehouse`] is the production implementation; [`MemoryStorage`] backs
//! tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use tickgate_warehouse::{ObservationRecord, OutcomeRecord, RunRecord, Warehouse};

use crate::orchestrator::PipelineRunResult;
use crate::{format_date, parse_date, InstrumentId, Observation, ObservationBatch, ProviderId, StorageError};

/// Result of an idempotent upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    /// Rows written, new or overwritten.
    pub stored: usize,
    /// Rows whose key did not exist before.
    pub new_rows: usize,
}

/// Persisted time-series store.
///
/// Writes are keyed by `(instrument, provider, date)` and must be idempotent.
pub trait Storage: Send + Sync {
    fn upsert(
        &self,
        instrument: &InstrumentId,
        provider: &ProviderId,
        batch: &ObservationBatch,
    ) -> Result<StoreSummary, StorageError>;

    fn latest_timestamp(
        &self,
        instrument: &InstrumentId,
        provider: &ProviderId,
    ) -> Result<Option<Date>, StorageError>;

    fn is_healthy(&self) -> bool;

    /// Whether the store's schema and extensions are fully in place.
    fn extensions_ok(&self) -> bool;

    /// Durably record a run and its quality reports.
    fn record_run(&self, result: &PipelineRunResult) -> Result<(), StorageError>;
}

impl Storage for Warehouse {
    fn upsert(
        &self,
        instrument: &InstrumentId,
        provider: &ProviderId,
        batch: &ObservationBatch,
    ) -> Result<StoreSummary, StorageError> {
        let rows = batch
            .observations
            .iter()
            .map(to_record)
            .collect::<Result<Vec<_>, _>>()?;
        let summary = self.upsert_observations(instrument.as_str(), provider.as_str(), &rows)?;
        Ok(StoreSummary {
            stored: summary.stored(),
            new_rows: summary.inserted,
        })
    }

    fn latest_timestamp(
        &self,
        instrument: &InstrumentId,
        provider: &ProviderId,
    ) -> Result<Option<Date>, StorageError> {
        Warehouse::latest_timestamp(self, instrument.as_str(), provider.as_str())?
            .map(|value| parse_date(&value).map_err(|e| StorageError::new(e.to_string())))
            .transpose()
    }

    fn is_healthy(&self) -> bool {
        self.ping().is_ok()
    }

    fn extensions_ok(&self) -> bool {
        self.migrations_current().unwrap_or(false)
    }

    fn record_run(&self, result: &PipelineRunResult) -> Result<(), StorageError> {
        Warehouse::record_run(self, &to_run_record(result)?)?;
        Ok(())
    }
}

fn to_record(obs: &Observation) -> Result<ObservationRecord, StorageError> {
    let value = obs.value.ok_or_else(|| {
        StorageError::new(format!("observation on {} has no value", format_date(obs.date)))
    })?;
    Ok(ObservationRecord {
        date: format_date(obs.date),
        value,
        open: obs.open,
        high: obs.high,
        low: obs.low,
        close: obs.close,
        volume: obs.volume,
    })
}

fn rfc3339(at: OffsetDateTime) -> Result<String, StorageError> {
    at.format(&Rfc3339)
        .map_err(|e| StorageError::new(format!("failed to format timestamp: {e}")))
}

fn to_run_record(result: &PipelineRunResult) -> Result<RunRecord, StorageError> {
    let outcomes = result
        .outcomes
        .iter()
        .map(|outcome| {
            let report_json = outcome
                .report
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| StorageError::new(format!("failed to serialize report: {e}")))?;
            Ok(OutcomeRecord {
                instrument: outcome.instrument.to_string(),
                provider: outcome.provider.to_string(),
                fetched: outcome.fetched as u64,
                stored: outcome.stored as u64,
                new_rows: outcome.new_rows as u64,
                score: outcome.report.as_ref().map(|report| report.score),
                band: outcome.report.as_ref().map(|report| report.band.to_string()),
                decision: outcome
                    .decision
                    .map_or_else(|| String::from("none"), |decision| decision.to_string()),
                error: outcome.error.as_ref().map(ToString::to_string),
                report_json,
            })
        })
        .collect::<Result<Vec<_>, StorageError>>()?;

    Ok(RunRecord {
        run_id: result.run_id.to_string(),
        mode: result.mode.to_string(),
        status: result.status.to_string(),
        started_at: rfc3339(result.started_at)?,
        finished_at: rfc3339(result.finished_at)?,
        range_start: format_date(result.range.start),
        range_end: format_date(result.range.end),
        outcomes,
    })
}

type PairKey = (InstrumentId, ProviderId);

#[derive(Debug, Default)]
struct MemoryState {
    series: BTreeMap<PairKey, BTreeMap<Date, Observation>>,
    runs: Vec<PipelineRunResult>,
    failing_pairs: BTreeSet<PairKey>,
    unhealthy: bool,
}

/// In-memory [`Storage`] with failure injection.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert for the pair fail.
    pub fn fail_upserts_for(&self, instrument: &InstrumentId, provider: &ProviderId) {
        self.lock()
            .failing_pairs
            .insert((instrument.clone(), provider.clone()));
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.lock().unhealthy = !healthy;
    }

    /// Stored observations for a pair, ascending by date.
    pub fn observations(&self, instrument: &InstrumentId, provider: &ProviderId) -> Vec<Observation> {
        self.lock()
            .series
            .get(&(instrument.clone(), provider.clone()))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self) -> usize {
        self.lock().series.values().map(BTreeMap::len).sum()
    }

    pub fn runs(&self) -> Vec<PipelineRunResult> {
        self.lock().runs.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn upsert(
        &self,
        instrument: &InstrumentId,
        provider: &ProviderId,
        batch: &ObservationBatch,
    ) -> Result<StoreSummary, StorageError> {
        let mut state = self.lock();
        let key = (instrument.clone(), provider.clone());
        if state.unhealthy || state.failing_pairs.contains(&key) {
            return Err(StorageError::new(format!(
                "upsert rejected for {instrument}/{provider}"
            )));
        }

        let rows = state.series.entry(key).or_default();
        let mut summary = StoreSummary::default();
        for obs in &batch.observations {
            if obs.value.is_none() {
                continue;
            }
            if rows.insert(obs.date, obs.clone()).is_none() {
                summary.new_rows += 1;
            }
            summary.stored += 1;
        }
        Ok(summary)
    }

    fn latest_timestamp(
        &self,
        instrument: &InstrumentId,
        provider: &ProviderId,
    ) -> Result<Option<Date>, StorageError> {
        let state = self.lock();
        if state.unhealthy {
            return Err(StorageError::new("storage unreachable"));
        }
        Ok(state
            .series
            .get(&(instrument.clone(), provider.clone()))
            .and_then(|rows| rows.keys().next_back().copied()))
    }

    fn is_healthy(&self) -> bool {
        !self.lock().unhealthy
    }

    fn extensions_ok(&self) -> bool {
        true
    }

    fn record_run(&self, result: &PipelineRunResult) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.unhealthy {
            return Err(StorageError::new("storage unreachable"));
        }
        state.runs.push(result.clone());
        Ok(())
    }
}

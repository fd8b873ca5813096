//! # Tickgate Warehouse
//!
//! DuckDB-backed persistence for tickgate.
//!
//! ## Overview
//!
//! The warehouse owns two concerns:
//!
//! - **Observations**: validated, gate-accepted observations keyed by
//!   `(instrument, provider, ts)`. Writes are `INSERT OR REPLACE`, so
//!   re-ingesting a date range never duplicates rows.
//! - **Run audit**: every pipeline run and the quality report of every
//!   `(instrument, provider)` pair it touched, so quality trends can be
//!   reconstructed later without re-fetching.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickgate_warehouse::{ObservationRecord, Warehouse};
//!
//! fn main() -> Result<(), tickgate_warehouse::WarehouseError> {
//!     let warehouse = Warehouse::open_default()?;
//!     let rows = vec![ObservationRecord {
//!         date: "2026-03-02".to_string(),
//!         value: 71.3,
//!         open: None,
//!         high: None,
//!         low: None,
//!         close: Some(71.3),
//!         volume: None,
//!     }];
//!
//!     let summary = warehouse.upsert_observations("WTI", "eia", &rows)?;
//!     println!("inserted={} updated={}", summary.inserted, summary.updated);
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `observations` | Accepted observations per instrument/provider/date |
//! | `pipeline_runs` | One row per orchestrator run |
//! | `run_outcomes` | Per-pair counts, score, gate decision, serialized report |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, Connection};
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{ConnectionPool, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A record was rejected before reaching the database.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for tickgate data.
    pub tickgate_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::in_home(resolve_tickgate_home())
    }
}

impl WarehouseConfig {
    /// Standard layout below a tickgate home directory.
    pub fn in_home(tickgate_home: PathBuf) -> Self {
        let db_path = tickgate_home.join("warehouse.duckdb");
        Self {
            tickgate_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// One observation row as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    /// Observation date as `YYYY-MM-DD`.
    pub date: String,
    pub value: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

/// Outcome of an idempotent upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    /// Keys that did not exist before this write.
    pub inserted: usize,
    /// Keys that existed and were overwritten.
    pub updated: usize,
}

impl UpsertSummary {
    pub const fn stored(self) -> usize {
        self.inserted + self.updated
    }
}

/// Audit row for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub mode: String,
    pub status: String,
    /// RFC3339 UTC.
    pub started_at: String,
    /// RFC3339 UTC.
    pub finished_at: String,
    pub range_start: String,
    pub range_end: String,
    pub outcomes: Vec<OutcomeRecord>,
}

/// Audit row for one `(instrument, provider)` pair within a run.
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    pub instrument: String,
    pub provider: String,
    pub fetched: u64,
    pub stored: u64,
    pub new_rows: u64,
    pub score: Option<f64>,
    pub band: Option<String>,
    pub decision: String,
    pub error: Option<String>,
    /// Serialized quality report, when one was produced.
    pub report_json: Option<String>,
}

/// One point of a pair's historical quality trend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityTrendPoint {
    pub run_id: String,
    pub started_at: String,
    pub score: Option<f64>,
    pub band: Option<String>,
    pub decision: String,
}

/// The main warehouse interface.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: ConnectionPool,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply pending migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    pub fn home(&self) -> &Path {
        self.config.tickgate_home.as_path()
    }

    /// Round-trip a trivial query.
    pub fn ping(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        let _: i32 = connection.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }

    /// Whether every known schema migration is applied.
    pub fn migrations_current(&self) -> Result<bool, WarehouseError> {
        let connection = self.pool.acquire()?;
        Ok(migrations::all_applied(&connection)?)
    }

    /// Insert-or-update observations for one pair inside a single transaction.
    ///
    /// Rows are keyed by `(instrument, provider, date)`; writing the same rows
    /// twice yields `inserted == 0` on the second call.
    pub fn upsert_observations(
        &self,
        instrument: &str,
        provider: &str,
        rows: &[ObservationRecord],
    ) -> Result<UpsertSummary, WarehouseError> {
        if rows.is_empty() {
            return Ok(UpsertSummary::default());
        }
        if let Some(row) = rows.iter().find(|row| !row.value.is_finite()) {
            return Err(WarehouseError::InvalidRecord(format!(
                "non-finite value for {instrument}/{provider} on {}",
                row.date
            )));
        }

        let connection = self.pool.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<UpsertSummary, WarehouseError> {
            let mut summary = UpsertSummary::default();
            for row in rows {
                let existing: i64 = connection.query_row(
                    "SELECT COUNT(*) FROM observations \
                     WHERE instrument = ? AND provider = ? AND ts = TRY_CAST(? AS DATE)",
                    params![instrument, provider, row.date],
                    |r| r.get(0),
                )?;

                connection.execute(
                    "INSERT OR REPLACE INTO observations \
                     (instrument, provider, ts, value, open, high, low, close, volume, updated_at) \
                     VALUES (?, ?, TRY_CAST(? AS DATE), ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params![
                        instrument,
                        provider,
                        row.date,
                        row.value,
                        row.open,
                        row.high,
                        row.low,
                        row.close,
                        row.volume,
                    ],
                )?;

                if existing == 0 {
                    summary.inserted += 1;
                } else {
                    summary.updated += 1;
                }
            }
            Ok(summary)
        })();

        finalize_transaction(&connection, result)
    }

    /// Latest stored observation date for a pair, as `YYYY-MM-DD`.
    pub fn latest_timestamp(
        &self,
        instrument: &str,
        provider: &str,
    ) -> Result<Option<String>, WarehouseError> {
        let connection = self.pool.acquire()?;
        let latest: Option<String> = connection.query_row(
            "SELECT CAST(MAX(ts) AS VARCHAR) FROM observations WHERE instrument = ? AND provider = ?",
            params![instrument, provider],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    pub fn count_observations(&self, instrument: &str, provider: &str) -> Result<u64, WarehouseError> {
        let connection = self.pool.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM observations WHERE instrument = ? AND provider = ?",
            params![instrument, provider],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Record a run and all of its pair outcomes atomically.
    pub fn record_run(&self, run: &RunRecord) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            connection.execute(
                "INSERT OR REPLACE INTO pipeline_runs \
                 (run_id, mode, status, started_at, finished_at, range_start, range_end, recorded_at) \
                 VALUES (?, ?, ?, ?, ?, TRY_CAST(? AS DATE), TRY_CAST(? AS DATE), CURRENT_TIMESTAMP)",
                params![
                    run.run_id,
                    run.mode,
                    run.status,
                    run.started_at,
                    run.finished_at,
                    run.range_start,
                    run.range_end,
                ],
            )?;

            for outcome in &run.outcomes {
                connection.execute(
                    "INSERT OR REPLACE INTO run_outcomes \
                     (run_id, instrument, provider, fetched, stored, new_rows, score, band, decision, error, report_json) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        run.run_id,
                        outcome.instrument,
                        outcome.provider,
                        to_i64(outcome.fetched),
                        to_i64(outcome.stored),
                        to_i64(outcome.new_rows),
                        outcome.score,
                        outcome.band,
                        outcome.decision,
                        outcome.error,
                        outcome.report_json,
                    ],
                )?;
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    /// Most recent quality outcomes for a pair, newest first.
    pub fn quality_history(
        &self,
        instrument: &str,
        provider: &str,
        limit: usize,
    ) -> Result<Vec<QualityTrendPoint>, WarehouseError> {
        let connection = self.pool.acquire()?;
        let mut statement = connection.prepare(
            "SELECT o.run_id, r.started_at, o.score, o.band, o.decision \
             FROM run_outcomes o JOIN pipeline_runs r ON r.run_id = o.run_id \
             WHERE o.instrument = ? AND o.provider = ? \
             ORDER BY r.started_at DESC LIMIT ?",
        )?;
        let rows = statement.query_map(
            params![instrument, provider, to_i64(limit as u64)],
            |row| {
                Ok(QualityTrendPoint {
                    run_id: row.get(0)?,
                    started_at: row.get(1)?,
                    score: row.get(2)?,
                    band: row.get(3)?,
                    decision: row.get(4)?,
                })
            },
        )?;

        let mut points = Vec::new();
        for row in rows {
            points.push(row?);
        }
        Ok(points)
    }

    /// Serialized report stored for a pair in a given run.
    pub fn stored_report(
        &self,
        run_id: &str,
        instrument: &str,
        provider: &str,
    ) -> Result<Option<String>, WarehouseError> {
        let connection = self.pool.acquire()?;
        let mut statement = connection.prepare(
            "SELECT report_json FROM run_outcomes WHERE run_id = ? AND instrument = ? AND provider = ?",
        )?;
        let mut rows = statement.query(params![run_id, instrument, provider])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    pub fn run_count(&self) -> Result<u64, WarehouseError> {
        let connection = self.pool.acquire()?;
        let count: i64 = connection.query_row("SELECT COUNT(*) FROM pipeline_runs", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

/// Commit on success, roll back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Resolve the tickgate home directory from environment or default.
pub fn resolve_tickgate_home() -> PathBuf {
    if let Some(path) = env::var_os("TICKGATE_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tickgate");
    }

    PathBuf::from(".tickgate")
}

//! # Tickgate Core
//!
//! Fetch orchestration, data-quality validation and quality gating for daily
//! commodity and market time series.
//!
//! ## Overview
//!
//! A pipeline run pulls each `(instrument, provider)` pair from its
//! [`SourceConnector`](source::SourceConnector), validates the batch, compares
//! providers against each other, scores the result and stores only what passes
//! the [`QualityGate`](quality::QualityGate).
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`domain`] | Identifiers, observations, instruments, calendars |
//! | [`source`] | Connector contract, fetch errors, registry |
//! | [`connectors`] | Fixture and HTTP JSON connectors |
//! | [`validation`] | Schema, range, outlier, completeness and cross-source checks |
//! | [`quality`] | Weighted scoring, bands and the gate |
//! | [`orchestrator`] | Bounded-concurrency run driver |
//! | [`scheduler`] | Cron trigger and non-overlapping background runs |
//! | [`monitor`] | Freshness and storage health |
//! | [`notifier`] | Run alerts and sinks |
//! | [`storage`] | Storage contract over the DuckDB warehouse |
//! | [`config`] | TOML pipeline configuration |
//! | [`retry`] / [`throttling`] / [`cache`] | Fetch plumbing |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`error`] | Core error types |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   fire    ┌──────────────┐  fetch (≤ N)  ┌──────────────────┐
//! │  Scheduler  │──────────▶│ Orchestrator │──────────────▶│ SourceConnectors │
//! └─────────────┘           └──────┬───────┘               └──────────────────┘
//!                                  │ validate → score → gate
//!                                  ▼
//!                           ┌──────────────┐      ┌──────────┐
//!                           │   Storage    │      │ Notifier │
//!                           └──────▲───────┘      └──────────┘
//!                                  │
//!                           ┌──────┴───────┐
//!                           │   Monitor    │
//!                           └──────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Only contract misuse and bad configuration are errors. Data-quality
//! findings and per-pair failures are carried as data inside
//! [`PipelineRunResult`](orchestrator::PipelineRunResult):
//!
//! ```rust
//! use tickgate_core::orchestrator::{PairOutcome, RunStatus};
//!
//! fn summarize(outcome: &PairOutcome) -> &'static str {
//!     match &outcome.error {
//!         Some(error) => error.code(),
//!         None if outcome.stored > 0 => "stored",
//!         None => "rejected",
//!     }
//! }
//! # let _ = RunStatus::Success;
//! ```

pub mod cache;
pub mod config;
pub mod connectors;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod monitor;
pub mod notifier;
pub mod orchestrator;
pub mod quality;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod storage;
pub mod throttling;
pub mod validation;

// Domain models
pub use domain::{
    format_date, parse_date, DateRange, InstrumentId, Observation, ObservationBatch,
    ObservationField, ProviderId, ProviderProfile, TrackedInstrument, TradingCalendar, ValueRange,
};

// Error types
pub use error::{ConfigurationError, InvalidBatchError, StorageError, ValidationError};

// Connector contract
pub use source::{
    CapabilitySet, ConnectorRegistry, FetchError, FetchErrorKind, FetchRequest, SourceConnector,
};

// Pipeline
pub use config::PipelineConfig;
pub use monitor::{FreshnessRecord, HealthReport, Monitor};
pub use notifier::{Alert, Notifier, Severity};
pub use orchestrator::{
    CancelFlag, Orchestrator, PairError, PairOutcome, PipelineRunResult, RunMode, RunRequest,
    RunStatus,
};
pub use quality::{GateDecision, QualityBand, QualityGate, QualityReport, QualityScorer};
pub use scheduler::{CronTrigger, PipelineRunner, Scheduler, SchedulerStatus};
pub use storage::{MemoryStorage, Storage};
pub use validation::{ValidationConfig, ValidationOutcome, Validator};

// Warehouse (re-exported from tickgate-warehouse)
pub use tickgate_warehouse::{Warehouse, WarehouseConfig, WarehouseError};

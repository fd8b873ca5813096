//! # Validation
//!
//! Per-batch data-quality checks.
//!
//! | Check | Fails the batch | Module |
//! |-------|-----------------|--------|
//! | Schema (structure, required fields) | yes | [`schema`] |
//! | Range (`[min, max]` plausibility) | no, recorded | here |
//! | Outliers (rolling Z-score and IQR) | no, flagged | [`outliers`] |
//! | Completeness (calendar-aware coverage and gaps) | no, recorded | [`completeness`] |
//! | Cross-source consistency | no, recorded | [`consistency`] |
//!
//! A schema failure short-circuits: the remaining per-batch checks are not
//! run. Every data-quality condition is returned as data; only contract misuse
//! produces an [`InvalidBatchError`].

pub mod completeness;
pub mod consistency;
pub mod outliers;
pub mod schema;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    ConfigurationError, DateRange, InstrumentId, InvalidBatchError, ObservationBatch, ProviderId,
    TrackedInstrument, ValueRange,
};

pub use completeness::{check_completeness, CompletenessOutcome, Gap};
pub use consistency::{compare_batches, relative_difference, ConsistencyOutcome};
pub use outliers::{detect_outliers, OutlierOutcome, OutlierParams, MIN_WINDOW_POINTS};
pub use schema::{check_schema, SchemaOutcome, SchemaViolation};

/// Validator thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Flag points with `|z|` above this.
    pub z_threshold: f64,
    /// IQR fence multiplier.
    pub iqr_multiplier: f64,
    /// Trailing window size for outlier detection.
    pub window: usize,
    /// Largest tolerated gap in trading days.
    pub gap_days_threshold: usize,
    /// Largest tolerated cross-source relative difference.
    pub tolerance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            z_threshold: 3.0,
            iqr_multiplier: 1.5,
            window: 30,
            gap_days_threshold: 2,
            tolerance: 0.05,
        }
    }
}

impl ValidationConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.z_threshold.is_finite() && self.z_threshold > 0.0) {
            return Err(ConfigurationError::invalid("z_threshold", "must be a positive number"));
        }
        if !(self.iqr_multiplier.is_finite() && self.iqr_multiplier > 0.0) {
            return Err(ConfigurationError::invalid("iqr_multiplier", "must be a positive number"));
        }
        if self.window < MIN_WINDOW_POINTS {
            return Err(ConfigurationError::invalid(
                "window",
                format!("must be at least {MIN_WINDOW_POINTS}"),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0 && self.tolerance <= 1.0) {
            return Err(ConfigurationError::invalid("tolerance", "must be in (0, 1]"));
        }
        Ok(())
    }

    pub fn outlier_params(&self) -> OutlierParams {
        OutlierParams {
            window: self.window,
            z_threshold: self.z_threshold,
            iqr_multiplier: self.iqr_multiplier,
        }
    }
}

/// A value outside the instrument's plausible range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeViolation {
    pub index: usize,
    pub date: Date,
    pub value: f64,
}

/// Result of the plausibility range check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeOutcome {
    pub min: f64,
    pub max: f64,
    pub violations: Vec<RangeViolation>,
}

/// Everything the validator learned about one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub instrument: InstrumentId,
    pub provider: ProviderId,
    pub range: DateRange,
    pub points: usize,
    pub schema: SchemaOutcome,
    /// `None` when the schema check failed.
    pub range_check: Option<RangeOutcome>,
    pub outliers: Option<OutlierOutcome>,
    pub completeness: Option<CompletenessOutcome>,
}

impl ValidationOutcome {
    pub fn schema_passed(&self) -> bool {
        self.schema.passed
    }

    /// Human-readable summary of every recorded violation.
    pub fn violation_messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = self.schema.violations.iter().map(ToString::to_string).collect();
        if let Some(range) = &self.range_check {
            messages.extend(range.violations.iter().map(|v| {
                format!(
                    "row {}: {} outside [{}, {}]",
                    v.index, v.value, range.min, range.max
                )
            }));
        }
        if let Some(completeness) = &self.completeness {
            if completeness.violation {
                messages.push(format!(
                    "gap of {} trading days exceeds {}",
                    completeness.largest_gap, completeness.gap_threshold
                ));
            }
        }
        messages
    }
}

/// Runs per-batch and cross-source checks against tracked instrument profiles.
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
    instruments: BTreeMap<InstrumentId, TrackedInstrument>,
}

impl Validator {
    pub fn new(config: ValidationConfig, instruments: impl IntoIterator<Item = TrackedInstrument>) -> Self {
        Self {
            config,
            instruments: instruments
                .into_iter()
                .map(|instrument| (instrument.id.clone(), instrument))
                .collect(),
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn instrument(&self, id: &InstrumentId) -> Option<&TrackedInstrument> {
        self.instruments.get(id)
    }

    /// Reject a batch whose identity differs from the request that produced it.
    pub fn ensure_identity(
        batch: &ObservationBatch,
        instrument: &InstrumentId,
        provider: &ProviderId,
    ) -> Result<(), InvalidBatchError> {
        if &batch.instrument == instrument && &batch.provider == provider {
            return Ok(());
        }
        Err(InvalidBatchError::MismatchedIdentity {
            instrument: batch.instrument.clone(),
            provider: batch.provider.clone(),
            expected_instrument: instrument.clone(),
            expected_provider: provider.clone(),
        })
    }

    /// Validate one provider's batch over the requested range.
    ///
    /// # Errors
    ///
    /// [`InvalidBatchError::UnknownInstrument`] when the batch names an
    /// instrument this validator has no profile for.
    pub fn validate(
        &self,
        batch: &ObservationBatch,
        range: DateRange,
    ) -> Result<ValidationOutcome, InvalidBatchError> {
        let instrument = self.instruments.get(&batch.instrument).ok_or_else(|| {
            InvalidBatchError::UnknownInstrument {
                instrument: batch.instrument.clone(),
            }
        })?;

        let schema = check_schema(batch, &instrument.all_required_fields(), range);
        let mut outcome = ValidationOutcome {
            instrument: batch.instrument.clone(),
            provider: batch.provider.clone(),
            range,
            points: batch.len(),
            schema,
            range_check: None,
            outliers: None,
            completeness: None,
        };
        if !outcome.schema.passed {
            return Ok(outcome);
        }

        // Schema passed: every row has a finite value.
        let values: Vec<(Date, f64)> = batch.values();
        let series: Vec<f64> = values.iter().map(|(_, value)| *value).collect();
        let dates: Vec<Date> = values.iter().map(|(date, _)| *date).collect();

        outcome.range_check = Some(check_range(&values, instrument.valid_range));
        outcome.outliers = Some(detect_outliers(&series, self.config.outlier_params()));
        outcome.completeness = Some(check_completeness(
            &dates,
            &instrument.calendar,
            range,
            self.config.gap_days_threshold,
        ));
        Ok(outcome)
    }

    /// Compare two batches for the same instrument.
    ///
    /// `tolerance` overrides the configured tolerance when given.
    pub fn validate_cross_source(
        &self,
        a: &ObservationBatch,
        b: &ObservationBatch,
        tolerance: Option<f64>,
    ) -> ConsistencyOutcome {
        compare_batches(a, b, tolerance.unwrap_or(self.config.tolerance))
    }
}

fn check_range(values: &[(Date, f64)], valid_range: ValueRange) -> RangeOutcome {
    let violations = values
        .iter()
        .enumerate()
        .filter(|(_, (_, value))| !valid_range.contains(*value))
        .map(|(index, (date, value))| RangeViolation {
            index,
            date: *date,
            value: *value,
        })
        .collect();

    RangeOutcome {
        min: valid_range.min(),
        max: valid_range.max(),
        violations,
    }
}

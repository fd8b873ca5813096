//! Quality scoring and gating.
//!
//! ```text
//! score = 0.4 * completeness + 0.3 * consistency + 0.2 * schema + 0.1 * outlier
//! ```
//!
//! Every component is normalized to `0..=100`. A failed schema check forces the
//! whole score to 0. Bands are advisory; the gate looks only at the number.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::validation::{ConsistencyOutcome, ValidationOutcome};
use crate::{ConfigurationError, InstrumentId, ProviderId};

pub const COMPLETENESS_WEIGHT: f64 = 0.4;
pub const CONSISTENCY_WEIGHT: f64 = 0.3;
pub const SCHEMA_WEIGHT: f64 = 0.2;
pub const OUTLIER_WEIGHT: f64 = 0.1;

/// Default acceptance threshold.
pub const DEFAULT_THRESHOLD: f64 = 70.0;

/// Advisory label for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    Excellent,
    Good,
    Fair,
    Poor,
    Unusable,
}

impl QualityBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 95.0 {
            Self::Excellent
        } else if score >= 85.0 {
            Self::Good
        } else if score >= 70.0 {
            Self::Fair
        } else if score >= 50.0 {
            Self::Poor
        } else {
            Self::Unusable
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Unusable => "unusable",
        }
    }
}

impl Display for QualityBand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized sub-scores, each in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub completeness: f64,
    pub consistency: f64,
    pub schema: f64,
    pub outlier: f64,
}

impl ScoreComponents {
    pub const fn zero() -> Self {
        Self {
            completeness: 0.0,
            consistency: 0.0,
            schema: 0.0,
            outlier: 0.0,
        }
    }

    pub fn weighted(self) -> f64 {
        COMPLETENESS_WEIGHT * self.completeness
            + CONSISTENCY_WEIGHT * self.consistency
            + SCHEMA_WEIGHT * self.schema
            + OUTLIER_WEIGHT * self.outlier
    }
}

/// Scored result for one batch, persisted with the run for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub instrument: InstrumentId,
    pub provider: ProviderId,
    pub score: f64,
    pub band: QualityBand,
    pub components: ScoreComponents,
    pub validation: ValidationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyOutcome>,
}

impl QualityReport {
    pub fn schema_passed(&self) -> bool {
        self.validation.schema_passed()
    }
}

/// Combines validation outcomes into a [`QualityReport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer;

impl QualityScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(
        &self,
        outcome: &ValidationOutcome,
        consistency: Option<&ConsistencyOutcome>,
    ) -> QualityReport {
        let components = if outcome.schema_passed() {
            ScoreComponents {
                completeness: completeness_score(outcome),
                consistency: consistency_score(consistency),
                schema: 100.0,
                outlier: outlier_score(outcome),
            }
        } else {
            ScoreComponents::zero()
        };

        let score = components.weighted().clamp(0.0, 100.0);
        QualityReport {
            instrument: outcome.instrument.clone(),
            provider: outcome.provider.clone(),
            score,
            band: QualityBand::from_score(score),
            components,
            validation: outcome.clone(),
            consistency: consistency.cloned(),
        }
    }
}

fn completeness_score(outcome: &ValidationOutcome) -> f64 {
    outcome
        .completeness
        .as_ref()
        .map_or(100.0, |completeness| 100.0 * completeness.ratio())
}

fn consistency_score(consistency: Option<&ConsistencyOutcome>) -> f64 {
    match consistency {
        Some(outcome) if !outcome.is_neutral() && outcome.tolerance > 0.0 => {
            100.0 * (1.0 - (outcome.max_diff / outcome.tolerance).min(1.0))
        }
        _ => 100.0,
    }
}

fn outlier_score(outcome: &ValidationOutcome) -> f64 {
    if outcome.points == 0 {
        return 100.0;
    }
    let flagged = outcome.outliers.as_ref().map_or(0, |o| o.count());
    (100.0 * (1.0 - flagged as f64 / outcome.points as f64)).clamp(0.0, 100.0)
}

/// Gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Accept,
    Reject,
}

impl GateDecision {
    pub const fn is_accept(self) -> bool {
        matches!(self, Self::Accept)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
        }
    }
}

impl Display for GateDecision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold decision on whether a batch may be stored. Pure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    threshold: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl QualityGate {
    pub fn new(threshold: f64) -> Result<Self, ConfigurationError> {
        validate_threshold(threshold)?;
        Ok(Self { threshold })
    }

    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Accept when `score >= threshold`. A batch that failed schema validation
    /// is rejected at any threshold.
    pub fn admit(&self, report: &QualityReport, threshold_override: Option<f64>) -> GateDecision {
        let threshold = threshold_override.unwrap_or(self.threshold);
        if report.schema_passed() && report.score >= threshold {
            GateDecision::Accept
        } else {
            GateDecision::Reject
        }
    }
}

pub(crate) fn validate_threshold(threshold: f64) -> Result<(), ConfigurationError> {
    if !(threshold.is_finite() && (0.0..=100.0).contains(&threshold)) {
        return Err(ConfigurationError::invalid(
            "quality_threshold",
            format!("must be within 0..=100, got {threshold}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_follow_score_cutoffs() {
        assert_eq!(QualityBand::from_score(100.0), QualityBand::Excellent);
        assert_eq!(QualityBand::from_score(95.0), QualityBand::Excellent);
        assert_eq!(QualityBand::from_score(94.99), QualityBand::Good);
        assert_eq!(QualityBand::from_score(85.0), QualityBand::Good);
        assert_eq!(QualityBand::from_score(70.0), QualityBand::Fair);
        assert_eq!(QualityBand::from_score(69.9), QualityBand::Poor);
        assert_eq!(QualityBand::from_score(50.0), QualityBand::Poor);
        assert_eq!(QualityBand::from_score(49.9), QualityBand::Unusable);
        assert_eq!(QualityBand::from_score(0.0), QualityBand::Unusable);
    }

    #[test]
    fn weights_sum_to_one() {
        let full = ScoreComponents {
            completeness: 100.0,
            consistency: 100.0,
            schema: 100.0,
            outlier: 100.0,
        };
        assert!((full.weighted() - 100.0).abs() < 1e-9);
        assert_eq!(ScoreComponents::zero().weighted(), 0.0);
    }

    #[test]
    fn gate_threshold_must_be_a_percentage() {
        assert!(QualityGate::new(70.0).is_ok());
        assert!(QualityGate::new(0.0).is_ok());
        assert!(QualityGate::new(100.1).is_err());
        assert!(QualityGate::new(f64::NAN).is_err());
        assert_eq!(QualityGate::default().threshold(), 70.0);
    }
}

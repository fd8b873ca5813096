use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{InstrumentId, ObservationBatch, ProviderId};

/// Pairwise comparison of two providers' batches for one instrument.
///
/// Symmetric: swapping the inputs swaps `provider_a`/`provider_b` and leaves
/// every measurement unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyOutcome {
    pub instrument: InstrumentId,
    pub provider_a: ProviderId,
    pub provider_b: ProviderId,
    pub matched_dates: usize,
    /// Mean relative difference over matched dates.
    pub avg_diff: f64,
    pub max_diff: f64,
    /// Earliest date with the largest difference.
    pub max_diff_date: Option<Date>,
    pub tolerance: f64,
    /// `max_diff > tolerance`.
    pub violation: bool,
}

impl ConsistencyOutcome {
    /// No overlapping dates means there is nothing to disagree about.
    pub fn is_neutral(&self) -> bool {
        self.matched_dates == 0
    }

    /// Whether `provider` took part in this comparison.
    pub fn involves(&self, provider: &ProviderId) -> bool {
        &self.provider_a == provider || &self.provider_b == provider
    }
}

/// `|a - b| / max(|a|, |b|)`, 0 when both are 0.
pub fn relative_difference(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return 0.0;
    }
    (a - b).abs() / scale
}

/// Join two batches on date and summarize their relative differences.
pub fn compare_batches(a: &ObservationBatch, b: &ObservationBatch, tolerance: f64) -> ConsistencyOutcome {
    let left: BTreeMap<Date, f64> = a.values().into_iter().collect();
    let right: BTreeMap<Date, f64> = b.values().into_iter().collect();

    let mut matched_dates = 0;
    let mut total = 0.0;
    let mut max_diff = 0.0;
    let mut max_diff_date = None;

    for (date, left_value) in &left {
        let Some(right_value) = right.get(date) else {
            continue;
        };
        let diff = relative_difference(*left_value, *right_value);
        matched_dates += 1;
        total += diff;
        if diff > max_diff || max_diff_date.is_none() {
            max_diff = diff;
            max_diff_date = Some(*date);
        }
    }

    let avg_diff = if matched_dates == 0 {
        0.0
    } else {
        total / matched_dates as f64
    };

    ConsistencyOutcome {
        instrument: a.instrument.clone(),
        provider_a: a.provider.clone(),
        provider_b: b.provider.clone(),
        matched_dates,
        avg_diff,
        max_diff,
        max_diff_date,
        tolerance,
        violation: max_diff > tolerance,
    }
}

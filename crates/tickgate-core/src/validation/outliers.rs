use serde::{Deserialize, Serialize};

/// Trailing points required before a point is tested.
pub const MIN_WINDOW_POINTS: usize = 5;

/// Outlier detection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierParams {
    pub window: usize,
    pub z_threshold: f64,
    pub iqr_multiplier: f64,
}

/// Indices (into the batch) flagged by each detector.
///
/// Outliers are flagged, never dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlierOutcome {
    /// Points that had a full enough trailing window to be tested.
    pub tested: usize,
    pub zscore: Vec<usize>,
    pub iqr: Vec<usize>,
    /// Union of both detectors, ascending.
    pub any: Vec<usize>,
}

impl OutlierOutcome {
    pub fn count(&self) -> usize {
        self.any.len()
    }
}

/// Rolling Z-score and IQR detection over `values`.
///
/// Each point is compared against the window of up to `params.window` points
/// immediately before it; the point itself is never part of its own window.
pub fn detect_outliers(values: &[f64], params: OutlierParams) -> OutlierOutcome {
    let mut outcome = OutlierOutcome::default();
    let window = params.window.max(MIN_WINDOW_POINTS);

    for (index, &value) in values.iter().enumerate() {
        if index < MIN_WINDOW_POINTS {
            continue;
        }
        let trailing = &values[index.saturating_sub(window)..index];
        outcome.tested += 1;

        let z_flag = zscore_flags(trailing, value, params.z_threshold);
        let iqr_flag = iqr_flags(trailing, value, params.iqr_multiplier);

        if z_flag {
            outcome.zscore.push(index);
        }
        if iqr_flag {
            outcome.iqr.push(index);
        }
        if z_flag || iqr_flag {
            outcome.any.push(index);
        }
    }

    outcome
}

fn zscore_flags(window: &[f64], value: f64, threshold: f64) -> bool {
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();

    if std <= f64::EPSILON * mean.abs().max(1.0) {
        return (value - mean).abs() > f64::EPSILON * mean.abs().max(1.0);
    }
    ((value - mean) / std).abs() > threshold
}

fn iqr_flags(window: &[f64], value: f64, multiplier: f64) -> bool {
    let mut sorted = window.to_vec();
    sorted.sort_by(f64::total_cmp);

    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    value < q1 - multiplier * iqr || value > q3 + multiplier * iqr
}

/// Linear-interpolated quantile of an ascending, non-empty slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> OutlierParams {
        OutlierParams {
            window: 30,
            z_threshold: 3.0,
            iqr_multiplier: 1.5,
        }
    }

    fn smooth(len: usize) -> Vec<f64> {
        (0..len).map(|i| 75.0 + (i % 5) as f64 * 0.1).collect()
    }

    #[test]
    fn smooth_series_has_no_outliers() {
        let outcome = detect_outliers(&smooth(40), params());
        assert_eq!(outcome.tested, 35);
        assert!(outcome.any.is_empty());
    }

    #[test]
    fn spike_is_flagged_by_both_detectors() {
        let mut values = smooth(40);
        values[20] = 120.0;

        let outcome = detect_outliers(&values, params());
        assert!(outcome.zscore.contains(&20));
        assert!(outcome.iqr.contains(&20));
        assert_eq!(outcome.any.first(), Some(&20));
    }

    #[test]
    fn union_includes_points_flagged_by_only_one_detector() {
        // The IQR of this window is zero, while one high print keeps the
        // standard deviation wide enough that |z| stays small.
        let values = vec![10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 20.0, 12.0];

        let outcome = detect_outliers(&values, params());
        assert!(outcome.iqr.contains(&8));
        assert!(!outcome.zscore.contains(&8));
        assert!(outcome.any.contains(&8));
    }

    #[test]
    fn flat_window_flags_any_change() {
        let values = vec![50.0, 50.0, 50.0, 50.0, 50.0, 50.0, 50.5];
        let outcome = detect_outliers(&values, params());
        assert_eq!(outcome.tested, 2);
        assert_eq!(outcome.any, vec![6]);
    }

    #[test]
    fn short_series_are_not_tested() {
        let outcome = detect_outliers(&[1.0, 100.0, 1.0, 100.0], params());
        assert_eq!(outcome.tested, 0);
        assert!(outcome.any.is_empty());
    }

    #[test]
    fn quantile_interpolates() {
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.25), 2.0);
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5);
    }
}

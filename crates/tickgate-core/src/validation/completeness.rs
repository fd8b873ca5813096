use serde::{Deserialize, Serialize};
use time::Date;

use crate::{DateRange, TradingCalendar};

/// Run of missing trading days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Last observation before the gap; `None` when the gap opens the range.
    pub after: Option<Date>,
    /// First observation after the gap; `None` when the gap closes the range.
    pub before: Option<Date>,
    pub missing_days: usize,
}

/// Expected versus actual trading-day coverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessOutcome {
    pub expected: usize,
    pub actual: usize,
    pub gaps: Vec<Gap>,
    /// Longest gap in trading days, 0 when there are none.
    pub largest_gap: usize,
    pub gap_threshold: usize,
    /// `largest_gap > gap_threshold`.
    pub violation: bool,
}

impl CompletenessOutcome {
    /// `actual / expected`, capped at 1. A range with no trading days is complete.
    pub fn ratio(&self) -> f64 {
        if self.expected == 0 {
            return 1.0;
        }
        (self.actual as f64 / self.expected as f64).min(1.0)
    }
}

/// Measure coverage of `dates` (ascending) against the calendar over `range`.
pub fn check_completeness(
    dates: &[Date],
    calendar: &TradingCalendar,
    range: DateRange,
    gap_threshold: usize,
) -> CompletenessOutcome {
    let expected_days = calendar.trading_days(range);
    let expected = expected_days.len();

    let mut observed: Vec<Date> = dates
        .iter()
        .copied()
        .filter(|date| range.contains(*date) && calendar.is_trading_day(*date))
        .collect();
    observed.dedup();
    let actual = observed.len();

    let mut gaps = Vec::new();
    match (observed.first(), observed.last()) {
        (Some(&first), Some(&last)) => {
            let leading = expected_days.iter().take_while(|day| **day < first).count();
            push_gap(&mut gaps, None, Some(first), leading);

            for pair in observed.windows(2) {
                let missing = calendar.trading_days_between(pair[0], pair[1]);
                push_gap(&mut gaps, Some(pair[0]), Some(pair[1]), missing);
            }

            let trailing = expected_days.iter().filter(|day| **day > last).count();
            push_gap(&mut gaps, Some(last), None, trailing);
        }
        _ => push_gap(&mut gaps, None, None, expected),
    }

    let largest_gap = gaps.iter().map(|gap| gap.missing_days).max().unwrap_or(0);

    CompletenessOutcome {
        expected,
        actual,
        gaps,
        largest_gap,
        gap_threshold,
        violation: largest_gap > gap_threshold,
    }
}

fn push_gap(gaps: &mut Vec<Gap>, after: Option<Date>, before: Option<Date>, missing_days: usize) {
    if missing_days > 0 {
        gaps.push(Gap {
            after,
            before,
            missing_days,
        });
    }
}

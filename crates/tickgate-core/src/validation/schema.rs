use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{format_date, DateRange, ObservationBatch, ObservationField};

/// One structural problem with a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaViolation {
    EmptyBatch,
    MissingField { index: usize, field: ObservationField },
    NonFinite { index: usize, field: ObservationField },
    OutOfOrder { index: usize },
    DuplicateDate { index: usize },
    /// `high < low`.
    InvertedBar { index: usize },
    DateOutsideRange { index: usize, date: Date },
}

impl Display for SchemaViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyBatch => f.write_str("batch is empty"),
            Self::MissingField { index, field } => write!(f, "row {index}: missing '{field}'"),
            Self::NonFinite { index, field } => write!(f, "row {index}: '{field}' is not finite"),
            Self::OutOfOrder { index } => write!(f, "row {index}: date is earlier than previous row"),
            Self::DuplicateDate { index } => write!(f, "row {index}: duplicate date"),
            Self::InvertedBar { index } => write!(f, "row {index}: high is below low"),
            Self::DateOutsideRange { index, date } => {
                write!(f, "row {index}: {} is outside the requested range", format_date(*date))
            }
        }
    }
}

/// Result of the structural check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaOutcome {
    pub passed: bool,
    pub violations: Vec<SchemaViolation>,
}

/// Check structure and required fields. Every violation is collected so the
/// report shows the whole picture, but any one of them fails the batch.
pub fn check_schema(
    batch: &ObservationBatch,
    required: &BTreeSet<ObservationField>,
    range: DateRange,
) -> SchemaOutcome {
    let mut violations = Vec::new();

    if batch.is_empty() {
        violations.push(SchemaViolation::EmptyBatch);
    }

    let mut previous: Option<Date> = None;
    for (index, obs) in batch.observations.iter().enumerate() {
        for field in required {
            match obs.field(*field) {
                None => violations.push(SchemaViolation::MissingField {
                    index,
                    field: *field,
                }),
                Some(value) if !value.is_finite() => violations.push(SchemaViolation::NonFinite {
                    index,
                    field: *field,
                }),
                Some(_) => {}
            }
        }

        // Optional fields that are present must still be numbers.
        for field in [
            ObservationField::Open,
            ObservationField::High,
            ObservationField::Low,
            ObservationField::Close,
            ObservationField::Volume,
        ] {
            if required.contains(&field) {
                continue;
            }
            if obs.field(field).is_some_and(|value| !value.is_finite()) {
                violations.push(SchemaViolation::NonFinite { index, field });
            }
        }

        if let (Some(high), Some(low)) = (obs.high, obs.low) {
            if high.is_finite() && low.is_finite() && high < low {
                violations.push(SchemaViolation::InvertedBar { index });
            }
        }

        if !range.contains(obs.date) {
            violations.push(SchemaViolation::DateOutsideRange {
                index,
                date: obs.date,
            });
        }

        if let Some(prev) = previous {
            if obs.date < prev {
                violations.push(SchemaViolation::OutOfOrder { index });
            } else if obs.date == prev {
                violations.push(SchemaViolation::DuplicateDate { index });
            }
        }
        previous = Some(obs.date);
    }

    SchemaOutcome {
        passed: violations.is_empty(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::{InstrumentId, Observation, ProviderId};

    fn batch(observations: Vec<Observation>) -> ObservationBatch {
        ObservationBatch::new(
            ProviderId::parse("eia").expect("id"),
            InstrumentId::parse("WTI").expect("id"),
            observations,
        )
    }

    fn march() -> DateRange {
        DateRange::new(date!(2026 - 03 - 01), date!(2026 - 03 - 31)).expect("range")
    }

    fn value_only() -> BTreeSet<ObservationField> {
        BTreeSet::from([ObservationField::Value])
    }

    #[test]
    fn well_formed_batch_passes() {
        let outcome = check_schema(
            &batch(vec![
                Observation::new(date!(2026 - 03 - 02), 70.0),
                Observation::new(date!(2026 - 03 - 03), 70.5),
            ]),
            &value_only(),
            march(),
        );
        assert!(outcome.passed);
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn empty_batch_fails() {
        let outcome = check_schema(&batch(vec![]), &value_only(), march());
        assert_eq!(outcome.violations, vec![SchemaViolation::EmptyBatch]);
    }

    #[test]
    fn missing_required_volume_is_reported_per_row() {
        let required = BTreeSet::from([ObservationField::Value, ObservationField::Volume]);
        let outcome = check_schema(
            &batch(vec![
                Observation::new(date!(2026 - 03 - 02), 70.0).with_volume(10.0),
                Observation::new(date!(2026 - 03 - 03), 70.5),
            ]),
            &required,
            march(),
        );
        assert!(!outcome.passed);
        assert_eq!(
            outcome.violations,
            vec![SchemaViolation::MissingField {
                index: 1,
                field: ObservationField::Volume
            }]
        );
    }

    #[test]
    fn ordering_duplicates_and_bars_are_checked() {
        let mut inverted = Observation::new(date!(2026 - 03 - 04), 70.0);
        inverted.high = Some(69.0);
        inverted.low = Some(71.0);

        let outcome = check_schema(
            &batch(vec![
                Observation::new(date!(2026 - 03 - 03), 70.0),
                Observation::new(date!(2026 - 03 - 03), 70.1),
                Observation::new(date!(2026 - 03 - 02), 70.2),
                inverted,
                Observation::new(date!(2026 - 04 - 01), f64::NAN),
            ]),
            &value_only(),
            march(),
        );

        assert!(outcome.violations.contains(&SchemaViolation::DuplicateDate { index: 1 }));
        assert!(outcome.violations.contains(&SchemaViolation::OutOfOrder { index: 2 }));
        assert!(outcome.violations.contains(&SchemaViolation::InvertedBar { index: 3 }));
        assert!(outcome.violations.contains(&SchemaViolation::NonFinite {
            index: 4,
            field: ObservationField::Value
        }));
        assert!(outcome.violations.contains(&SchemaViolation::DateOutsideRange {
            index: 4,
            date: date!(2026 - 04 - 01)
        }));
    }
}

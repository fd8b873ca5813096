use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

use crate::{InstrumentId, ProviderId, ValidationError};

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(input: &str) -> Result<Date, ValidationError> {
    Date::parse(input.trim(), format_description!("[year]-[month]-[day]")).map_err(|_| {
        ValidationError::InvalidDate {
            value: input.to_owned(),
        }
    })
}

/// Format a date as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

impl DateRange {
    pub fn new(start: Date, end: Date) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedDateRange {
                start: format_date(start),
                end: format_date(end),
            });
        }
        Ok(Self { start, end })
    }

    /// Range ending at `end`, starting at `start` or `end` if `start` is later.
    pub fn ending_at(start: Date, end: Date) -> Self {
        Self {
            start: start.min(end),
            end,
        }
    }

    pub fn contains(self, date: Date) -> bool {
        date >= self.start && date <= self.end
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", format_date(self.start), format_date(self.end))
    }
}

/// Fields an observation may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationField {
    Value,
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl ObservationField {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Open => "open",
            Self::High => "high",
            Self::Low => "low",
            Self::Close => "close",
            Self::Volume => "volume",
        }
    }

    pub const fn is_ohlc(self) -> bool {
        matches!(self, Self::Open | Self::High | Self::Low | Self::Close)
    }
}

impl Display for ObservationField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObservationField {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "value" => Ok(Self::Value),
            "open" => Ok(Self::Open),
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            "close" => Ok(Self::Close),
            "volume" => Ok(Self::Volume),
            other => Err(ValidationError::UnknownField {
                value: other.to_owned(),
            }),
        }
    }
}

/// One dated observation exactly as a connector normalized it.
///
/// Every field but the date is optional so that missing upstream fields reach
/// the schema check instead of being papered over by the connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: Date,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl Observation {
    /// Value-only observation.
    pub fn new(date: Date, value: f64) -> Self {
        Self {
            date,
            value: Some(value),
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
        }
    }

    pub fn with_ohlc(mut self, open: f64, high: f64, low: f64, close: f64) -> Self {
        self.open = Some(open);
        self.high = Some(high);
        self.low = Some(low);
        self.close = Some(close);
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn field(&self, field: ObservationField) -> Option<f64> {
        match field {
            ObservationField::Value => self.value,
            ObservationField::Open => self.open,
            ObservationField::High => self.high,
            ObservationField::Low => self.low,
            ObservationField::Close => self.close,
            ObservationField::Volume => self.volume,
        }
    }
}

/// One provider's observations for one instrument over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationBatch {
    pub provider: ProviderId,
    pub instrument: InstrumentId,
    pub observations: Vec<Observation>,
}

impl ObservationBatch {
    pub fn new(provider: ProviderId, instrument: InstrumentId, observations: Vec<Observation>) -> Self {
        Self {
            provider,
            instrument,
            observations,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// `(date, value)` pairs for observations that carry a finite value.
    pub fn values(&self) -> Vec<(Date, f64)> {
        self.observations
            .iter()
            .filter_map(|obs| match obs.value {
                Some(value) if value.is_finite() => Some((obs.date, value)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn parses_and_formats_dates() {
        let parsed = parse_date("2026-03-02").expect("date");
        assert_eq!(parsed, date!(2026 - 03 - 02));
        assert_eq!(format_date(parsed), "2026-03-02");
        assert!(matches!(
            parse_date("03/02/2026"),
            Err(ValidationError::InvalidDate { .. })
        ));
    }

    #[test]
    fn rejects_inverted_ranges() {
        let err = DateRange::new(date!(2026 - 03 - 05), date!(2026 - 03 - 01)).expect_err("inverted");
        assert!(matches!(err, ValidationError::InvertedDateRange { .. }));
    }

    #[test]
    fn observation_without_value_deserializes_with_none() {
        let obs: Observation = serde_json::from_str(r#"{"date":"2026-03-02","close":71.2}"#).expect("json");
        assert_eq!(obs.value, None);
        assert_eq!(obs.close, Some(71.2));
    }
}

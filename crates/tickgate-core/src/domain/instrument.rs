use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{ObservationField, TradingCalendar};
use crate::{InstrumentId, ProviderId, ValidationError};

/// Inclusive plausibility range for an instrument's value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawValueRange")]
pub struct ValueRange {
    min: f64,
    max: f64,
}

#[derive(Deserialize)]
struct RawValueRange {
    min: f64,
    max: f64,
}

impl TryFrom<RawValueRange> for ValueRange {
    type Error = ValidationError;

    fn try_from(raw: RawValueRange) -> Result<Self, Self::Error> {
        Self::new(raw.min, raw.max)
    }
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Result<Self, ValidationError> {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ValidationError::InvalidValueRange {
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(Self { min, max })
    }

    pub const fn min(self) -> f64 {
        self.min
    }

    pub const fn max(self) -> f64 {
        self.max
    }

    pub fn contains(self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Reference data for an instrument the pipeline tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedInstrument {
    pub id: InstrumentId,
    pub name: String,
    pub unit: String,
    pub valid_range: ValueRange,
    /// Fields every observation must carry. `value` is always implied.
    #[serde(default)]
    pub required_fields: BTreeSet<ObservationField>,
    #[serde(default)]
    pub calendar: TradingCalendar,
}

impl TrackedInstrument {
    pub fn new(
        id: InstrumentId,
        name: impl Into<String>,
        unit: impl Into<String>,
        valid_range: ValueRange,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            unit: unit.into(),
            valid_range,
            required_fields: BTreeSet::new(),
            calendar: TradingCalendar::default(),
        }
    }

    pub fn requiring(mut self, field: ObservationField) -> Self {
        self.required_fields.insert(field);
        self
    }

    pub fn with_calendar(mut self, calendar: TradingCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    /// Required fields including the implicit `value`.
    pub fn all_required_fields(&self) -> BTreeSet<ObservationField> {
        let mut fields = self.required_fields.clone();
        fields.insert(ObservationField::Value);
        fields
    }
}

/// Static description of an upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: ProviderId,
    /// Provider-native series key per tracked instrument.
    #[serde(default)]
    pub series_keys: BTreeMap<InstrumentId, String>,
    /// Maximum upstream requests per day.
    #[serde(default = "default_daily_request_budget")]
    pub daily_request_budget: u32,
}

fn default_daily_request_budget() -> u32 {
    500
}

impl ProviderProfile {
    pub fn new(id: ProviderId, daily_request_budget: u32) -> Self {
        Self {
            id,
            series_keys: BTreeMap::new(),
            daily_request_budget,
        }
    }

    pub fn with_series(mut self, instrument: InstrumentId, key: impl Into<String>) -> Self {
        self.series_keys.insert(instrument, key.into());
        self
    }

    pub fn series_key(&self, instrument: &InstrumentId) -> Option<&str> {
        self.series_keys.get(instrument).map(String::as_str)
    }
}

//! # Domain Models
//!
//! Shared reference and data types for tickgate.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`InstrumentId`] / [`ProviderId`] | Validated identifiers |
//! | [`TrackedInstrument`] | Instrument reference data: unit, valid range, required fields, calendar |
//! | [`ProviderProfile`] | Provider series keys and request budget |
//! | [`Observation`] / [`ObservationBatch`] | Connector output |
//! | [`DateRange`] | Inclusive date window |
//! | [`TradingCalendar`] | Dates an instrument is expected to print |
//!
//! Construction validates invariants; identifiers and ranges reject invalid
//! input with [`ValidationError`](crate::ValidationError).

mod calendar;
mod ids;
mod instrument;
mod observation;

pub use calendar::TradingCalendar;
pub use ids::{InstrumentId, ProviderId};
pub use instrument::{ProviderProfile, TrackedInstrument, ValueRange};
pub use observation::{
    format_date, parse_date, DateRange, Observation, ObservationBatch, ObservationField,
};

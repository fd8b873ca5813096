//! Source connector contract and registration.
//!
//! Connectors are external collaborators: each one hides a provider's wire
//! format behind a single normalized fetch. The orchestrator only ever sees
//! [`ObservationBatch`] values or typed [`FetchError`]s.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SourceConnector`] | Normalized fetch contract |
//! | [`FetchRequest`] | Instrument, native series key and date range |
//! | [`FetchError`] | Typed failure with a transient/terminal classification |
//! | [`CapabilitySet`] | Optional fields a connector can deliver |
//! | [`ConnectorRegistry`] | Connectors keyed by provider, tagged with capabilities |

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{DateRange, InstrumentId, ObservationBatch, ObservationField, ProviderId, TrackedInstrument};

/// Boxed future returned by [`SourceConnector::fetch`].
pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ObservationBatch, FetchError>> + Send + 'a>>;

/// One connector call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub instrument: InstrumentId,
    /// Provider-native series key for the instrument.
    pub series_key: String,
    pub range: DateRange,
}

impl FetchRequest {
    pub fn new(instrument: InstrumentId, series_key: impl Into<String>, range: DateRange) -> Self {
        Self {
            instrument,
            series_key: series_key.into(),
            range,
        }
    }
}

/// Fetch failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    RateLimited,
    ServerError,
    NotFound,
    Malformed,
}

impl FetchErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::NotFound => "not_found",
            Self::Malformed => "malformed",
        }
    }
}

impl Display for FetchErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured connector error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    retryable: bool,
}

impl FetchError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    /// Local request budget exhausted. Retrying inside the same run cannot help.
    pub fn budget_exhausted(provider: &ProviderId) -> Self {
        Self {
            kind: FetchErrorKind::RateLimited,
            message: format!("daily request budget for '{provider}' is exhausted"),
            retryable: false,
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::ServerError,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::NotFound,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Malformed,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether another attempt may succeed.
    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FetchErrorKind::RateLimited => "fetch.rate_limited",
            FetchErrorKind::ServerError => "fetch.server_error",
            FetchErrorKind::NotFound => "fetch.not_found",
            FetchErrorKind::Malformed => "fetch.malformed",
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for FetchError {}

/// Optional fields a connector can populate. `value` is always supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub ohlc: bool,
    #[serde(default)]
    pub volume: bool,
}

impl CapabilitySet {
    pub const fn new(ohlc: bool, volume: bool) -> Self {
        Self { ohlc, volume }
    }

    pub const fn value_only() -> Self {
        Self::new(false, false)
    }

    pub const fn full() -> Self {
        Self::new(true, true)
    }

    pub const fn supports(self, field: ObservationField) -> bool {
        match field {
            ObservationField::Value => true,
            ObservationField::Open
            | ObservationField::High
            | ObservationField::Low
            | ObservationField::Close => self.ohlc,
            ObservationField::Volume => self.volume,
        }
    }

    /// Fields the instrument requires that this connector cannot deliver.
    pub fn missing_for(self, instrument: &TrackedInstrument) -> Vec<ObservationField> {
        instrument
            .all_required_fields()
            .into_iter()
            .filter(|field| !self.supports(*field))
            .collect()
    }
}

/// Source connector contract.
///
/// Implementations must be `Send + Sync`: the orchestrator shares them across
/// fetch tasks.
pub trait SourceConnector: Send + Sync {
    /// Provider this connector fetches from.
    fn id(&self) -> ProviderId;

    /// Fetch normalized observations for one instrument and date range.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the provider rate-limits, fails, does not
    /// know the series, or returns a document that cannot be normalized.
    fn fetch<'a>(&'a self, request: FetchRequest) -> FetchFuture<'a>;
}

/// Connector plus the capabilities it was registered with.
#[derive(Clone)]
pub struct RegisteredConnector {
    pub connector: Arc<dyn SourceConnector>,
    pub capabilities: CapabilitySet,
}

/// Connectors keyed by provider id.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    entries: BTreeMap<ProviderId, RegisteredConnector>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector. A later registration for the same provider wins.
    pub fn register(&mut self, connector: Arc<dyn SourceConnector>, capabilities: CapabilitySet) {
        let id = connector.id();
        self.entries.insert(
            id,
            RegisteredConnector {
                connector,
                capabilities,
            },
        );
    }

    pub fn with(mut self, connector: Arc<dyn SourceConnector>, capabilities: CapabilitySet) -> Self {
        self.register(connector, capabilities);
        self
    }

    pub fn get(&self, provider: &ProviderId) -> Option<&RegisteredConnector> {
        self.entries.get(provider)
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(id, entry)| (id.as_str(), entry.capabilities)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValueRange;

    #[test]
    fn capability_gaps_are_reported_per_field() {
        let instrument = TrackedInstrument::new(
            InstrumentId::parse("WTI").expect("id"),
            "WTI Crude",
            "USD/bbl",
            ValueRange::new(10.0, 300.0).expect("range"),
        )
        .requiring(ObservationField::Volume)
        .requiring(ObservationField::Close);

        assert_eq!(
            CapabilitySet::value_only().missing_for(&instrument),
            vec![ObservationField::Close, ObservationField::Volume]
        );
        assert!(CapabilitySet::full().missing_for(&instrument).is_empty());
    }

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(FetchError::rate_limited("429").retryable());
        assert!(FetchError::server_error("502").retryable());
        assert!(!FetchError::not_found("404").retryable());
        assert!(!FetchError::malformed("bad json").retryable());

        let exhausted = FetchError::budget_exhausted(&ProviderId::parse("eia").expect("id"));
        assert_eq!(exhausted.kind(), FetchErrorKind::RateLimited);
        assert!(!exhausted.retryable());
    }
}

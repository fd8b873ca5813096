use thiserror::Error;

use crate::{InstrumentId, ProviderId};

/// Validation errors raised while constructing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{kind} identifier cannot be empty")]
    EmptyIdentifier { kind: &'static str },
    #[error("{kind} identifier length {len} exceeds max {max}")]
    IdentifierTooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{kind} identifier contains invalid character '{ch}' at index {index}")]
    IdentifierInvalidChar {
        kind: &'static str,
        ch: char,
        index: usize,
    },

    #[error("valid range must satisfy finite min < max, got [{min}, {max}]")]
    InvalidValueRange { min: String, max: String },

    #[error("date range start {start} is after end {end}")]
    InvertedDateRange { start: String, end: String },

    #[error("date must be YYYY-MM-DD: '{value}'")]
    InvalidDate { value: String },

    #[error("unknown observation field '{value}'")]
    UnknownField { value: String },
}

/// Raised when a batch violates the connector contract itself rather than
/// carrying poor-quality data. Fatal for that batch only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidBatchError {
    #[error("no tracked instrument profile for '{instrument}'")]
    UnknownInstrument { instrument: InstrumentId },

    #[error("batch for {instrument}/{provider} does not match the request for {expected_instrument}/{expected_provider}")]
    MismatchedIdentity {
        instrument: InstrumentId,
        provider: ProviderId,
        expected_instrument: InstrumentId,
        expected_provider: ProviderId,
    },
}

/// Failure of a storage collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("storage error: {message}")]
pub struct StorageError {
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<tickgate_warehouse::WarehouseError> for StorageError {
    fn from(error: tickgate_warehouse::WarehouseError) -> Self {
        Self::new(error.to_string())
    }
}

/// Invalid configuration. Only ever fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid value for '{option}': {reason}")]
    InvalidOption { option: &'static str, reason: String },

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ConfigurationError {
    pub fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option,
            reason: reason.into(),
        }
    }
}

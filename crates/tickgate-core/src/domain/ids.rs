use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_ID_LEN: usize = 32;

/// Tracked instrument identifier, normalized to uppercase (e.g. `WTI`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentId(String);

/// Upstream provider identifier, normalized to lowercase (e.g. `eia`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl InstrumentId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        normalize("instrument", input).map(|value| Self(value.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ProviderId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        normalize("provider", input).map(|value| Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn normalize(kind: &'static str, input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyIdentifier { kind });
    }

    let len = trimmed.chars().count();
    if len > MAX_ID_LEN {
        return Err(ValidationError::IdentifierTooLong {
            kind,
            len,
            max: MAX_ID_LEN,
        });
    }

    for (index, ch) in trimmed.chars().enumerate() {
        let valid = ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.');
        if !valid {
            return Err(ValidationError::IdentifierInvalidChar { kind, ch, index });
        }
    }

    Ok(trimmed.to_owned())
}

macro_rules! string_id_impls {
    ($ty:ident) => {
        impl Display for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = ValidationError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }
    };
}

string_id_impls!(InstrumentId);
string_id_impls!(ProviderId);

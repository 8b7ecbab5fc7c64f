use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::EngineError;

/// ISO 4217-style currency code (three ASCII letters, stored uppercase).
///
/// Groups are multi-currency: every expense and settlement carries its own
/// code, and balances never mix across codes. Currency is therefore a map
/// key in the snapshot, not an enum, so any code works without a schema
/// change.
///
/// All monetary values tagged with a currency are `i64` **minor units**
/// (cents for EUR/USD). The engine never converts between currencies.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Currency([u8; 3]);

impl Currency {
    /// Canonical currency code.
    #[must_use]
    pub fn code(&self) -> &str {
        // Invariant: constructed from ASCII letters only.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({})", self.code())
    }
}

impl TryFrom<&str> for Currency {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(EngineError::InvalidCurrency(format!(
                "expected a 3-letter code, got \"{trimmed}\""
            )));
        }
        let mut code = [0u8; 3];
        for (slot, c) in code.iter_mut().zip(trimmed.chars()) {
            *slot = c.to_ascii_uppercase() as u8;
        }
        Ok(Currency(code))
    }
}

impl std::str::FromStr for Currency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::try_from(s)
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CodeVisitor;

        impl de::Visitor<'_> for CodeVisitor {
            type Value = Currency;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 3-letter currency code")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Currency, E> {
                Currency::try_from(v).map_err(|err| E::custom(err.to_string()))
            }
        }

        // String visitor so the type also works as a JSON map key.
        deserializer.deserialize_str(CodeVisitor)
    }
}

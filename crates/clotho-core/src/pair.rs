//! Currency pair parsing and the exchange symbol format.

use crate::error::CoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Ordered (base, counter) pair, e.g. `XBT/USD`.
///
/// `Display` renders the exchange symbol (`XBTUSD`), which is what every
/// REST query and WebSocket channel expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurrencyPair {
    base: String,
    counter: String,
}

impl CurrencyPair {
    pub fn new(base: impl Into<String>, counter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            counter: counter.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn counter(&self) -> &str {
        &self.counter
    }

    /// Exchange symbol (no separator).
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.counter)
    }

    /// Human form with separator, as written in configuration.
    pub fn to_slash_string(&self) -> String {
        format!("{}/{}", self.base, self.counter)
    }
}

impl FromStr for CurrencyPair {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, counter) = s
            .split_once('/')
            .ok_or_else(|| CoreError::InvalidPair(format!("missing '/' in {s:?}")))?;
        if base.is_empty() || counter.is_empty() || counter.contains('/') {
            return Err(CoreError::InvalidPair(s.to_string()));
        }
        Ok(Self::new(base, counter))
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.counter)
    }
}

impl Serialize for CurrencyPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_slash_string())
    }
}

impl<'de> Deserialize<'de> for CurrencyPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_symbol() {
        let pair: CurrencyPair = "XBT/USD".parse().unwrap();
        assert_eq!(pair.base(), "XBT");
        assert_eq!(pair.counter(), "USD");
        assert_eq!(pair.to_string(), "XBTUSD");
        assert_eq!(pair.symbol(), "XBTUSD");
    }

    #[test]
    fn test_parse_unparse_for_many_pairs() {
        for (raw, symbol) in [("ETH/USD", "ETHUSD"), ("A/B", "AB"), ("XBT/U20", "XBTU20")] {
            let pair: CurrencyPair = raw.parse().unwrap();
            assert_eq!(pair.to_string(), symbol);
            assert_eq!(pair.to_slash_string(), raw);
        }
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!(matches!(
            "XBTUSD".parse::<CurrencyPair>(),
            Err(CoreError::InvalidPair(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_sides() {
        assert!("/USD".parse::<CurrencyPair>().is_err());
        assert!("XBT/".parse::<CurrencyPair>().is_err());
        assert!("XBT/USD/EUR".parse::<CurrencyPair>().is_err());
    }

    #[test]
    fn test_serde_uses_slash_form() {
        let pair = CurrencyPair::new("XBT", "USD");
        let json = serde_json::to_string(&pair).unwrap();
        assert_eq!(json, "\"XBT/USD\"");
        let back: CurrencyPair = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pair);
    }
}

//! Instrument identifier types
//!
//! Exchange symbols are case-insensitive on the wire: REST endpoints take the
//! upper-case form ("BNBUSDT") while stream names use the lower-case form
//! ("bnbusdt@depth"). `Symbol` stores the canonical upper-case form.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::TypesError;

/// Trading instrument symbol (e.g., "BNBUSDT", "BTCUSDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Try to create a Symbol, normalizing to upper case.
    ///
    /// Rejects empty strings and anything but ASCII alphanumerics.
    pub fn try_new(symbol: impl AsRef<str>) -> Result<Self, TypesError> {
        let s = symbol.as_ref().trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TypesError::InvalidSymbol(s.to_string()));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }

    /// Get the canonical (upper-case) symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-case form used in stream names.
    pub fn stream_prefix(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Name of the depth-diff stream for this symbol.
    pub fn depth_stream(&self) -> String {
        format!("{}@depth", self.stream_prefix())
    }

    /// Name of the trade stream for this symbol.
    pub fn trade_stream(&self) -> String {
        format!("{}@trade", self.stream_prefix())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = TypesError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::try_new(s)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_normalization() {
        let symbol = Symbol::try_new("bnbusdt").unwrap();
        assert_eq!(symbol.as_str(), "BNBUSDT");
        assert_eq!(symbol.to_string(), "BNBUSDT");
    }

    #[test]
    fn test_symbol_stream_names() {
        let symbol = Symbol::try_new("BTCUSDT").unwrap();
        assert_eq!(symbol.depth_stream(), "btcusdt@depth");
        assert_eq!(symbol.trade_stream(), "btcusdt@trade");
    }

    #[test]
    fn test_symbol_try_new() {
        assert!(Symbol::try_new("ETHUSDT").is_ok());
        assert!(Symbol::try_new("").is_err());
        assert!(Symbol::try_new("BTC/USDT").is_err());
    }

    #[test]
    fn test_symbol_serialization() {
        let symbol = Symbol::try_new("ethusdt").unwrap();
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"ETHUSDT\"");

        let deserialized: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(symbol, deserialized);
        assert!(serde_json::from_str::<Symbol>("\"\"").is_err());
    }
}

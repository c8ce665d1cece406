//! Currency codes and pairs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RateSyncError, Result};

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    ///
    /// The code is upper-cased but not validated; use [`Currency::parse`] for
    /// input that has not been checked yet.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Parse and validate a currency code (three ASCII letters).
    pub fn parse(code: &str) -> Result<Self> {
        let trimmed = code.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RateSyncError::invalid_field(
                "currency",
                format!("malformed currency code '{}'", code),
            ));
        }
        Ok(Self::new(trimmed))
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn jpy() -> Self {
        Self::new("JPY")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A (base, target) pair identifying one stored rate series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Base currency (the unit being priced).
    pub base: Currency,
    /// Target currency (the series' own currency).
    pub target: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, target: Currency) -> Self {
        Self { base, target }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case() {
        let currency = Currency::parse(" eur ").unwrap();
        assert_eq!(currency, Currency::eur());
        assert_eq!(currency.code(), "EUR");
    }

    #[test]
    fn test_parse_rejects_malformed_codes() {
        for bad in ["", "EU", "EURO", "E1R", "€UR"] {
            let err = Currency::parse(bad).unwrap_err();
            assert!(matches!(err, RateSyncError::Validation { .. }), "{bad}");
        }
    }

    #[test]
    fn test_pair_display() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::jpy());
        assert_eq!(pair.to_string(), "USD/JPY");
    }
}

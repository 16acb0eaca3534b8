//! Currency codes and the fixed-point [`Money`] type.

mod money;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;

pub use money::Money;

/// ISO 4217 currency representation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode([u8; 3]);

impl CurrencyCode {
    pub const USD: CurrencyCode = CurrencyCode(*b"USD");
    pub const EUR: CurrencyCode = CurrencyCode(*b"EUR");
    pub const JPY: CurrencyCode = CurrencyCode(*b"JPY");

    pub fn new(code: &str) -> Result<Self, LedgerError> {
        let upper = code.trim().to_ascii_uppercase();
        let bytes = upper.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(LedgerError::InvalidAmount(format!(
                "`{}` is not a three-letter currency code",
                code
            )));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII letters are ever stored.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }

    /// Number of decimal places used by the currency's minor unit.
    pub fn minor_units(&self) -> u8 {
        minor_units_for(self.as_str())
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self::USD
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CurrencyCode::new(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.as_str().to_string()
    }
}

pub fn minor_units_for(code: &str) -> u8 {
    match code {
        "JPY" => 0,
        "KWD" | "BHD" => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_code_normalizes_case() {
        let code = CurrencyCode::new("usd").unwrap();
        assert_eq!(code, CurrencyCode::USD);
        assert_eq!(code.to_string(), "USD");
    }

    #[test]
    fn currency_code_rejects_garbage() {
        assert!(CurrencyCode::new("US").is_err());
        assert!(CurrencyCode::new("U5D").is_err());
    }

    #[test]
    fn currency_code_serializes_as_string() {
        let json = serde_json::to_string(&CurrencyCode::EUR).unwrap();
        assert_eq!(json, "\"EUR\"");
        let back: CurrencyCode = serde_json::from_str("\"jpy\"").unwrap();
        assert_eq!(back, CurrencyCode::JPY);
        assert_eq!(back.minor_units(), 0);
    }
}

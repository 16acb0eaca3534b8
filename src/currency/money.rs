use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::CurrencyCode;
use crate::errors::{LedgerError, Result};

const BASIS_POINTS: i64 = 10_000;

/// Exact amount of money stored as integer minor units (cents for USD).
///
/// Every binary operation checks that both operands share a currency and fails
/// with [`LedgerError::CurrencyMismatch`] otherwise. Overflow surfaces as
/// [`LedgerError::AmountOverflow`] instead of wrapping.
///
/// Ratio and percentage operations round half away from zero to the nearest
/// minor unit: `0.5` cents becomes `1` cent and `-0.5` cents becomes `-1` cent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    minor_units: i64,
    currency: CurrencyCode,
}

impl Money {
    pub fn from_minor(minor_units: i64, currency: CurrencyCode) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    pub fn zero(currency: CurrencyCode) -> Self {
        Self::from_minor(0, currency)
    }

    /// Parses a plain decimal string such as `"250.00"` or `"-3.5"`.
    ///
    /// Input with more fractional digits than the currency supports is rejected
    /// rather than rounded.
    pub fn parse(text: &str, currency: CurrencyCode) -> Result<Self> {
        let raw = text.trim();
        let (negative, body) = match raw.as_bytes().first() {
            Some(b'-') => (true, &raw[1..]),
            Some(b'+') => (false, &raw[1..]),
            _ => (false, raw),
        };
        let (whole, fraction) = match body.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (body, ""),
        };
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(fraction) {
            return Err(LedgerError::InvalidAmount(format!(
                "`{}` is not a decimal amount",
                text
            )));
        }
        if body.ends_with('.') {
            return Err(LedgerError::InvalidAmount(format!(
                "`{}` has a trailing decimal point",
                text
            )));
        }
        let exponent = currency.minor_units() as usize;
        if fraction.len() > exponent {
            return Err(LedgerError::InvalidAmount(format!(
                "`{}` has more precision than {} supports",
                text, currency
            )));
        }

        let scale = pow10(exponent as u32)?;
        let whole_value: i64 = whole.parse().map_err(|_| LedgerError::AmountOverflow)?;
        let fraction_value: i64 = if fraction.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", fraction, width = exponent);
            padded.parse().map_err(|_| LedgerError::AmountOverflow)?
        };
        let magnitude = whole_value
            .checked_mul(scale)
            .and_then(|value| value.checked_add(fraction_value))
            .ok_or(LedgerError::AmountOverflow)?;
        let minor_units = if negative { -magnitude } else { magnitude };
        Ok(Self::from_minor(minor_units, currency))
    }

    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    pub fn currency(&self) -> CurrencyCode {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    pub fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    pub fn is_negative(&self) -> bool {
        self.minor_units < 0
    }

    pub fn checked_add(self, other: Money) -> Result<Money> {
        self.ensure_same_currency(&other)?;
        self.minor_units
            .checked_add(other.minor_units)
            .map(|value| Money::from_minor(value, self.currency))
            .ok_or(LedgerError::AmountOverflow)
    }

    pub fn checked_sub(self, other: Money) -> Result<Money> {
        self.ensure_same_currency(&other)?;
        self.minor_units
            .checked_sub(other.minor_units)
            .map(|value| Money::from_minor(value, self.currency))
            .ok_or(LedgerError::AmountOverflow)
    }

    pub fn checked_mul(self, factor: i64) -> Result<Money> {
        self.minor_units
            .checked_mul(factor)
            .map(|value| Money::from_minor(value, self.currency))
            .ok_or(LedgerError::AmountOverflow)
    }

    /// Multiplies by `numerator / denominator`, rounding half away from zero.
    pub fn mul_ratio(self, numerator: i64, denominator: i64) -> Result<Money> {
        if denominator == 0 {
            return Err(LedgerError::InvalidAmount(
                "ratio denominator must not be zero".into(),
            ));
        }
        let product = self.minor_units as i128 * numerator as i128;
        let rounded = div_round_half_away(product, denominator as i128);
        i64::try_from(rounded)
            .map(|value| Money::from_minor(value, self.currency))
            .map_err(|_| LedgerError::AmountOverflow)
    }

    /// Applies a rate expressed in basis points (1% == 100).
    pub fn percentage(self, basis_points: i64) -> Result<Money> {
        self.mul_ratio(basis_points, BASIS_POINTS)
    }

    pub fn checked_neg(self) -> Result<Money> {
        self.minor_units
            .checked_neg()
            .map(|value| Money::from_minor(value, self.currency))
            .ok_or(LedgerError::AmountOverflow)
    }

    pub fn abs(self) -> Result<Money> {
        self.minor_units
            .checked_abs()
            .map(|value| Money::from_minor(value, self.currency))
            .ok_or(LedgerError::AmountOverflow)
    }

    /// Compares two amounts of the same currency.
    pub fn try_cmp(&self, other: &Money) -> Result<Ordering> {
        self.ensure_same_currency(other)?;
        Ok(self.minor_units.cmp(&other.minor_units))
    }

    pub fn ensure_same_currency(&self, other: &Money) -> Result<()> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(LedgerError::CurrencyMismatch {
                expected: self.currency.to_string(),
                found: other.currency.to_string(),
            })
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exponent = self.currency.minor_units() as u32;
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let magnitude = self.minor_units.unsigned_abs();
        if exponent == 0 {
            return write!(f, "{}{} {}", sign, magnitude, self.currency);
        }
        let scale = 10u64.pow(exponent);
        write!(
            f,
            "{}{}.{:0width$} {}",
            sign,
            magnitude / scale,
            magnitude % scale,
            self.currency,
            width = exponent as usize
        )
    }
}

fn pow10(exponent: u32) -> Result<i64> {
    10i64
        .checked_pow(exponent)
        .ok_or(LedgerError::AmountOverflow)
}

fn div_round_half_away(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.abs() * 2 >= denominator.abs() {
        quotient + numerator.signum() * denominator.signum()
    } else {
        quotient
    }
}

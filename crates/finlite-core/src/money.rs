//! Money type with decimal precision and currency.
//!
//! Never use floating-point for money calculations. This type wraps
//! `rust_decimal::Decimal` and tags every amount with an ISO 4217 currency.
//! Amounts are kept at a fixed scale of 4 fractional digits, rounded half-up
//! at the scale boundary.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage scale for monetary amounts (fractional digits).
pub const MONEY_SCALE: u32 = 4;

/// An ISO 4217 currency code (three ASCII letters, uppercase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Validate and normalize a currency code.
    pub fn new(code: &str) -> Result<Self> {
        let trimmed = code.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::InvalidCurrency(code.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// A monetary amount tagged with its currency.
///
/// Arithmetic is only defined between amounts of the same currency; mixing
/// currencies fails with [`Error::CurrencyMismatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

/// Round a decimal to the money storage scale (half-up at scale 4).
pub fn quantize(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

impl Money {
    /// Create an amount, rounding to the storage scale.
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self {
            amount: quantize(amount),
            currency,
        }
    }

    /// Zero in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    /// Parse a human-entered amount in the given currency.
    ///
    /// Accepts dot-decimal (`1234.56`), comma-decimal (`1234,56`), thousands
    /// separators (`1.234,56`), and a leading currency sigil (`R$ -0,01`).
    pub fn from_text(text: &str, currency: Currency) -> Result<Self> {
        Ok(Self::new(parse_amount(text)?, currency))
    }

    /// True if the amount is zero, regardless of sign.
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        !self.amount.is_zero() && self.amount.is_sign_negative()
    }

    pub fn is_positive(&self) -> bool {
        !self.amount.is_zero() && self.amount.is_sign_positive()
    }

    /// Absolute value, same currency.
    pub fn abs(&self) -> Self {
        Self {
            amount: self.amount.abs(),
            currency: self.currency.clone(),
        }
    }

    /// Add an amount of the same currency.
    pub fn checked_add(&self, other: &Money) -> Result<Money> {
        self.ensure_same_currency(other)?;
        Ok(Self::new(self.amount + other.amount, self.currency.clone()))
    }

    /// Subtract an amount of the same currency.
    pub fn checked_sub(&self, other: &Money) -> Result<Money> {
        self.ensure_same_currency(other)?;
        Ok(Self::new(self.amount - other.amount, self.currency.clone()))
    }

    /// Compare two amounts of the same currency.
    pub fn compare(&self, other: &Money) -> Result<Ordering> {
        self.ensure_same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<()> {
        if self.currency != other.currency {
            return Err(Error::CurrencyMismatch {
                left: self.currency.to_string(),
                right: other.currency.to_string(),
            });
        }
        Ok(())
    }
}

impl std::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money {
            amount: -self.amount,
            currency: self.currency,
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.currency, self.amount)
    }
}

/// Parse an amount string, handling currency sigils and both decimal styles.
///
/// When both `,` and `.` occur, the rightmost acts as the decimal separator
/// and the other is treated as a thousands separator.
pub fn parse_amount(text: &str) -> Result<Decimal> {
    let mut raw = text.trim().to_string();
    for sigil in ["R$", "$"] {
        raw = raw.replace(sigil, "");
    }
    raw.retain(|c| !c.is_whitespace());

    let comma = raw.rfind(',');
    let dot = raw.rfind('.');
    match (comma, dot) {
        (Some(c), Some(d)) if c > d => {
            // BR format: dot thousands, comma decimal
            raw = raw.replace('.', "").replace(',', ".");
        }
        (Some(_), Some(_)) => {
            // US format: comma thousands, dot decimal
            raw = raw.replace(',', "");
        }
        (Some(_), None) => {
            raw = raw.replace(',', ".");
        }
        _ => {}
    }

    Decimal::from_str(&raw).map_err(|_| Error::ParseAmount(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn brl() -> Currency {
        Currency::new("BRL").unwrap()
    }

    #[test]
    fn test_parse_amount_formats() {
        assert_eq!(parse_amount("1234.56").unwrap(), dec!(1234.56));
        assert_eq!(parse_amount("-1234.56").unwrap(), dec!(-1234.56));
        assert_eq!(parse_amount("1234,56").unwrap(), dec!(1234.56));
        assert_eq!(parse_amount("1.234,56").unwrap(), dec!(1234.56));
        assert_eq!(parse_amount("1,234.56").unwrap(), dec!(1234.56));
        assert_eq!(parse_amount("R$ -0,01").unwrap(), dec!(-0.01));
        assert_eq!(parse_amount(" R$ 1.234,56 ").unwrap(), dec!(1234.56));
    }

    #[test]
    fn test_parse_amount_invalid() {
        assert!(matches!(parse_amount("abc"), Err(Error::ParseAmount(_))));
        assert!(matches!(parse_amount(""), Err(Error::ParseAmount(_))));
    }

    #[test]
    fn test_currency_validation() {
        assert_eq!(Currency::new("usd").unwrap().as_str(), "USD");
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("U5D").is_err());
    }

    #[test]
    fn test_arithmetic_requires_same_currency() {
        let a = Money::new(dec!(10), brl());
        let b = Money::new(dec!(5), Currency::new("USD").unwrap());
        assert!(matches!(
            a.checked_add(&b),
            Err(Error::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_add_and_negate() {
        let a = Money::new(dec!(10.5), brl());
        let b = Money::new(dec!(-10.5), brl());
        let sum = a.checked_add(&b).unwrap();
        assert!(sum.is_zero());
        assert_eq!(-a, b);
    }

    #[test]
    fn test_zero_ignores_sign() {
        let negative_zero = Money::new(dec!(-0.0), brl());
        assert!(negative_zero.is_zero());
        assert!(!negative_zero.is_negative());
    }

    #[test]
    fn test_quantize_half_up() {
        assert_eq!(quantize(dec!(1.00005)), dec!(1.0001));
        assert_eq!(quantize(dec!(-1.00005)), dec!(-1.0001));
        assert_eq!(quantize(dec!(1.00004)), dec!(1.0000));
    }
}

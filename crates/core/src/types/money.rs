//! Decimal money helpers.
//!
//! Catalog prices are stored as `NUMERIC` in the currency's major unit
//! (kroner, dollars). The payment provider expects integer minor units
//! (øre, cents), always `price × 100` for the two-decimal currencies the shop
//! sells in.

use core::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Minor units per major unit for supported currencies.
const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Errors converting a price to provider minor units.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Prices must not be negative.
    #[error("price cannot be negative: {0}")]
    Negative(Decimal),
    /// Price does not fit the provider's integer amount.
    #[error("price out of range: {0}")]
    OutOfRange(Decimal),
}

/// Errors parsing a [`CurrencyCode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("currency code must be three ASCII letters, got {0:?}")]
pub struct CurrencyError(String);

/// Convert a major-unit price to integer minor units (`price × 100`).
///
/// Sub-minor fractions are rounded half away from zero.
///
/// # Errors
///
/// Returns [`MoneyError`] for negative prices or amounts that overflow `i64`.
pub fn to_minor_units(price: Decimal) -> Result<i64, MoneyError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(MoneyError::Negative(price));
    }

    price
        .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
        .map(|minor| minor.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|minor| minor.to_i64())
        .ok_or(MoneyError::OutOfRange(price))
}

/// Total for one order line from its snapshot price.
#[must_use]
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

/// ISO 4217 currency code, normalised to lowercase as the provider expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse a three-letter currency code.
    ///
    /// # Errors
    ///
    /// Returns [`CurrencyError`] unless the input is exactly three ASCII letters.
    pub fn parse(s: &str) -> Result<Self, CurrencyError> {
        if s.len() == 3 && s.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(CurrencyError(s.to_owned()))
        }
    }

    /// The lowercase code, e.g. `nok`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self("nok".to_owned())
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

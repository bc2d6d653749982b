//! Money Module
//!
//! Supported currencies and the validation every client-supplied amount goes
//! through before it reaches a unit of work.
//!
//! ## Representation
//! - Amounts and balances are `rust_decimal::Decimal`, never floats
//! - Each currency has a fixed number of minor-unit decimals
//! - Input with more decimals than the currency allows is REJECTED, not rounded
//!
//! ## Usage
//! ```rust
//! use wallet_ledger::money::{Currency, parse_amount};
//!
//! let amount = parse_amount("1500.50", Currency::Ngn).unwrap();
//! assert_eq!(amount.to_string(), "1500.50");
//! ```

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Money validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

/// Wallet currencies on the supported allow-list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ngn,
    Usd,
    Eur,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Ngn, Currency::Usd, Currency::Eur];

    /// ISO 4217 code, also the stored column value
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Ngn => "NGN",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }

    /// Number of minor-unit decimals
    #[inline]
    pub fn decimals(&self) -> u32 {
        2
    }

    /// Round a computed value (e.g. a conversion result) to minor units.
    ///
    /// Uses banker's rounding, the `Decimal` default for money.
    pub fn round(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.decimals(), RoundingStrategy::MidpointNearestEven)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NGN" => Ok(Currency::Ngn),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            other => Err(MoneyError::UnsupportedCurrency(other.to_string())),
        }
    }
}

/// Validate a client-supplied amount for `currency`.
///
/// # Errors
/// * `InvalidAmount` - zero or negative
/// * `PrecisionOverflow` - more decimals than the currency's minor units
pub fn validate_amount(amount: Decimal, currency: Currency) -> Result<Decimal, MoneyError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let normalized = amount.normalize();
    if normalized.scale() > currency.decimals() {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: currency.decimals(),
        });
    }

    Ok(amount)
}

/// Validate a fee, which unlike an amount may be zero.
pub fn validate_fee(fee: Decimal, currency: Currency) -> Result<Decimal, MoneyError> {
    if fee.is_zero() {
        return Ok(Decimal::ZERO);
    }
    validate_amount(fee, currency)
}

/// Parse a client string amount into a validated `Decimal`.
///
/// Strict about formatting: "0.5" is accepted, ".5" and "5." are not.
pub fn parse_amount(amount_str: &str, currency: Currency) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    if amount_str.starts_with('.') {
        return Err(MoneyError::InvalidFormat(
            "missing leading zero (e.g., use 0.5 instead of .5)".into(),
        ));
    }
    if amount_str.ends_with('.') {
        return Err(MoneyError::InvalidFormat(
            "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
        ));
    }

    let amount = Decimal::from_str(amount_str)
        .map_err(|e| MoneyError::InvalidFormat(format!("{}: {}", amount_str, e)))?;

    validate_amount(amount, currency)
}

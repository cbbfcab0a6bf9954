//! Fixed-point decimal types for prices
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Prices carry exactly two fractional digits, matching the gold ledger's
//! currency scale.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of fractional digits in a gold amount
pub const CURRENCY_SCALE: u32 = 2;

/// Largest accepted price per unit (99,999,999.99)
pub const MAX_PRICE: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Largest accepted order quantity
pub const MAX_QUANTITY: u64 = 1_000_000_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    #[error("price must be positive, got {0}")]
    NotPositive(Decimal),

    #[error("price {0} has more than two fractional digits")]
    TooPrecise(Decimal),

    #[error("price {0} exceeds maximum 99999999.99")]
    TooLarge(Decimal),
}

/// Price per unit, in gold
///
/// Always positive and always stored at [`CURRENCY_SCALE`], so `5` and
/// `5.00` compare, hash and print the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Price {
    /// Validate and normalise a price
    pub fn try_new(value: Decimal) -> Result<Self, PriceError> {
        if value <= Decimal::ZERO {
            return Err(PriceError::NotPositive(value));
        }
        if value.normalize().scale() > CURRENCY_SCALE {
            return Err(PriceError::TooPrecise(value));
        }
        if value > MAX_PRICE {
            return Err(PriceError::TooLarge(value));
        }
        let mut scaled = value;
        scaled.rescale(CURRENCY_SCALE);
        Ok(Self(scaled))
    }

    /// Whole-gold price, for tests and fixtures
    pub fn from_u64(value: u64) -> Self {
        let mut scaled = Decimal::from(value);
        scaled.rescale(CURRENCY_SCALE);
        Self(scaled)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// `quantity * price`, or `None` on overflow
    pub fn total(&self, quantity: u64) -> Option<Decimal> {
        Decimal::from(quantity).checked_mul(self.0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

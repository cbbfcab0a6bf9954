//! Resource ledger rows
//!
//! One row per (holder, resource). `available` is spendable, `reserved` is
//! set aside by active market orders. Both sides are non-negative at all
//! times; every method checks before it mutates, so a failed call leaves
//! the row untouched.

use crate::errors::LedgerError;
use crate::ids::CityId;
use crate::resource::ResourceType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who holds a balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Holder {
    /// A player's city stockpile
    City(CityId),
    /// Market tax collector
    Treasury,
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Holder::City(id) => write!(f, "city:{}", id),
            Holder::Treasury => f.write_str("treasury"),
        }
    }
}

/// Ledger row key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub holder: Holder,
    pub resource: ResourceType,
}

impl LedgerKey {
    pub fn city(city_id: CityId, resource: ResourceType) -> Self {
        Self {
            holder: Holder::City(city_id),
            resource,
        }
    }

    pub fn treasury(resource: ResourceType) -> Self {
        Self {
            holder: Holder::Treasury,
            resource,
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.holder, self.resource)
    }
}

/// Balance row with optimistic-concurrency version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub key: LedgerKey,
    #[serde(with = "rust_decimal::serde::str")]
    pub available: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub reserved: Decimal,
    pub version: u64,
}

impl LedgerEntry {
    /// Empty row, as seen before the first write
    pub fn empty(key: LedgerKey) -> Self {
        Self {
            key,
            available: Decimal::ZERO,
            reserved: Decimal::ZERO,
            version: 0,
        }
    }

    /// Total holdings: available + reserved
    pub fn amount(&self) -> Decimal {
        self.available + self.reserved
    }

    /// Add to available balance (deposit, reward, trade proceeds)
    pub fn credit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        check_amount(amount)?;
        self.available = self
            .available
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Take from available balance (purchase, building cost, trade payment)
    pub fn debit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if amount > self.available {
            return Err(self.shortfall(amount, self.available));
        }
        self.available -= amount;
        Ok(())
    }

    /// Move available balance into the reserved side
    pub fn reserve(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if amount > self.available {
            return Err(self.shortfall(amount, self.available));
        }
        self.available -= amount;
        self.reserved = self
            .reserved
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Return reserved balance to available
    pub fn release(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if amount > self.reserved {
            return Err(self.shortfall(amount, self.reserved));
        }
        self.reserved -= amount;
        self.available = self
            .available
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Spend reserved balance (order fill)
    pub fn consume_reserved(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if amount > self.reserved {
            return Err(self.shortfall(amount, self.reserved));
        }
        self.reserved -= amount;
        Ok(())
    }

    fn shortfall(&self, required: Decimal, available: Decimal) -> LedgerError {
        LedgerError::InsufficientFunds {
            resource: self.key.resource,
            required,
            available,
        }
    }
}

fn check_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

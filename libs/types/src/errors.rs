//! Error types for the resource market
//!
//! Error taxonomy using thiserror. `LedgerError` is raised by single balance
//! rows; `MarketError` is what every market operation returns.

use crate::ids::{CityId, OrderId, UserId};
use crate::numeric::PriceError;
use crate::order::OrderStatus;
use crate::resource::ResourceType;
use rust_decimal::Decimal;
use thiserror::Error;

/// Balance-row errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient {resource}: required {required}, available {available}")]
    InsufficientFunds {
        resource: ResourceType,
        required: Decimal,
        available: Decimal,
    },

    #[error("Version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("Ledger amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Arithmetic overflow in balance calculation")]
    Overflow,
}

/// Top-level market error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient {resource}: required {required}, available {available}")]
    InsufficientFunds {
        resource: ResourceType,
        required: Decimal,
        available: Decimal,
    },

    #[error("City {city_id} does not belong to user {user_id}")]
    CityNotOwned { user_id: UserId, city_id: CityId },

    #[error("User {requester} does not own order {order_id}")]
    NotOwner { order_id: OrderId, requester: UserId },

    #[error("Order {order_id} is {status}, not active")]
    InvalidState { order_id: OrderId, status: OrderStatus },

    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: OrderId },

    #[error("Order {order_id} is not available for execution")]
    OrderUnavailable { order_id: OrderId },

    #[error("Order {order_id} has no remaining quantity")]
    OrderAlreadyFilled { order_id: OrderId },

    #[error("Self-trade prevention triggered")]
    SelfTrade,

    #[error("Concurrency conflict persisted after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Journal error: {0}")]
    Journal(String),
}

impl MarketError {
    /// Conflicts are transient: the client should re-read and may retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::ConcurrencyConflict { .. })
    }
}

impl From<LedgerError> for MarketError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                resource,
                required,
                available,
            } => MarketError::InsufficientFunds {
                resource,
                required,
                available,
            },
            other => MarketError::Ledger(other),
        }
    }
}

impl From<PriceError> for MarketError {
    fn from(err: PriceError) -> Self {
        MarketError::Validation(err.to_string())
    }
}

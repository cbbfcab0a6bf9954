//! Order lifecycle types
//!
//! An order moves `active → completed | cancelled | expired` and never leaves
//! a terminal state. `version` belongs to the store: it is bumped on every
//! committed write, never by the methods here.

use crate::errors::MarketError;
use crate::ids::{CityId, OrderId, UserId};
use crate::ledger::LedgerKey;
use crate::numeric::Price;
use crate::resource::ResourceType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Bid: pays gold, receives the resource
    Buy,
    /// Ask: delivers the resource, receives gold
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        })
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Visible and executable
    Active,
    /// Remaining quantity reached zero (terminal)
    Completed,
    /// Withdrawn by the owner (terminal)
    Cancelled,
    /// Swept after `expires_at` (terminal)
    Expired,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderStatus::Active => "active",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        })
    }
}

/// A standing offer on the market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub owner_id: UserId,
    pub owner_city_id: CityId,
    pub side: Side,
    pub resource_type: ResourceType,
    pub quantity: u64,
    pub remaining_quantity: u64,
    pub price_per_unit: Price,
    pub status: OrderStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Order {
    /// Create a new active order
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_id: UserId,
        owner_city_id: CityId,
        side: Side,
        resource_type: ResourceType,
        quantity: u64,
        price_per_unit: Price,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::new(),
            owner_id,
            owner_city_id,
            side,
            resource_type,
            quantity,
            remaining_quantity: quantity,
            price_per_unit,
            status: OrderStatus::Active,
            expires_at,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == OrderStatus::Active
    }

    /// Past its expiry, whether or not the sweeper has run yet
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Active, unexpired and with something left to fill
    pub fn is_executable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.remaining_quantity > 0 && !self.is_expired_at(now)
    }

    pub fn filled_quantity(&self) -> u64 {
        self.quantity - self.remaining_quantity
    }

    /// Ledger row holding this order's reservation
    ///
    /// Sell orders reserve the traded resource, buy orders reserve gold.
    pub fn reservation_key(&self) -> LedgerKey {
        match self.side {
            Side::Sell => LedgerKey::city(self.owner_city_id, self.resource_type),
            Side::Buy => LedgerKey::city(self.owner_city_id, ResourceType::CURRENCY),
        }
    }

    /// Amount reserved for `quantity` units of this order
    pub fn reservation_for(&self, quantity: u64) -> Option<Decimal> {
        match self.side {
            Side::Sell => Some(Decimal::from(quantity)),
            Side::Buy => self.price_per_unit.total(quantity),
        }
    }

    /// Decrement the remainder by a fill, completing the order at zero
    pub fn apply_fill(&mut self, quantity: u64, now: DateTime<Utc>) -> Result<(), MarketError> {
        if !self.is_active() {
            return Err(MarketError::InvalidState {
                order_id: self.id,
                status: self.status,
            });
        }
        if quantity == 0 || quantity > self.remaining_quantity {
            return Err(MarketError::Validation(format!(
                "fill of {} against remaining {}",
                quantity, self.remaining_quantity
            )));
        }
        self.remaining_quantity -= quantity;
        if self.remaining_quantity == 0 {
            self.status = OrderStatus::Completed;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Move an active order to `cancelled` or `expired`
    pub fn close(&mut self, status: OrderStatus, now: DateTime<Utc>) -> Result<(), MarketError> {
        if !self.is_active() || !matches!(status, OrderStatus::Cancelled | OrderStatus::Expired) {
            return Err(MarketError::InvalidState {
                order_id: self.id,
                status: self.status,
            });
        }
        self.status = status;
        self.updated_at = now;
        Ok(())
    }
}

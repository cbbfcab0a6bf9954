//! Settlement records
//!
//! One `Transaction` per fill. Total and tax are computed by the constructor
//! from quantity, price and the tax policy; nothing else sets them.

use crate::errors::LedgerError;
use crate::fee::TaxPolicy;
use crate::ids::{CityId, OrderId, TransactionId, UserId};
use crate::numeric::Price;
use crate::resource::ResourceType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The two sides of a fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parties {
    pub buyer_id: UserId,
    pub buyer_city_id: CityId,
    pub seller_id: UserId,
    pub seller_city_id: CityId,
}

/// Immutable record of one settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    /// Order the fill executed against
    pub order_id: OrderId,
    /// Incoming order, when the fill came from crossing at creation
    pub counter_order_id: Option<OrderId>,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub buyer_city_id: CityId,
    pub seller_city_id: CityId,
    pub resource_type: ResourceType,
    pub quantity: u64,
    pub price_per_unit: Price,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub tax_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Record a fill, deriving total price and tax
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        order_id: OrderId,
        counter_order_id: Option<OrderId>,
        parties: Parties,
        resource_type: ResourceType,
        quantity: u64,
        price_per_unit: Price,
        tax: &TaxPolicy,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let total_price = price_per_unit.total(quantity).ok_or(LedgerError::Overflow)?;
        let tax_amount = tax.tax_on(total_price);
        Ok(Self {
            id: TransactionId::new(),
            order_id,
            counter_order_id,
            buyer_id: parties.buyer_id,
            seller_id: parties.seller_id,
            buyer_city_id: parties.buyer_city_id,
            seller_city_id: parties.seller_city_id,
            resource_type,
            quantity,
            price_per_unit,
            total_price,
            tax_amount,
            created_at: now,
        })
    }

    /// What the seller is credited: total minus tax
    pub fn seller_proceeds(&self) -> Decimal {
        self.total_price - self.tax_amount
    }

    /// Check if a user took part in this trade
    pub fn involves(&self, user_id: UserId) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }
}

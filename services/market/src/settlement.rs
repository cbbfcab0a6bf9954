//! Settlement
//!
//! One fill is one changeset: the buyer's gold, the seller's resource, the
//! tax skim, the order's remainder and the transaction row commit together
//! or not at all. The order is re-read on every attempt, so a fill that
//! lost a race only ever takes what is left.
//!
//! Funding of each leg depends on who stands behind it:
//!
//! | leg            | order owner           | account counterparty | order counterparty      |
//! |----------------|-----------------------|----------------------|-------------------------|
//! | buyer pays     | consumes reservation  | debits available     | consumes reservation    |
//! | seller delivers| consumes reservation  | debits available     | consumes reservation    |
//!
//! Received legs (resource to the buyer, proceeds to the seller, tax to the
//! treasury) always credit available balances.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use types::errors::{LedgerError, MarketError};
use types::fee::TaxPolicy;
use types::ids::{CityId, OrderId, UserId};
use types::ledger::LedgerKey;
use types::order::{Order, OrderStatus, Side};
use types::resource::ResourceType;
use types::transaction::{Parties, Transaction};

use crate::book::committed_order;
use crate::matching::crossing;
use crate::retry::with_retry;
use crate::store::{Changeset, CommitError, Store};

/// The other side of a fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counterparty {
    /// A player executing against the order from a city's available stock
    Account { user_id: UserId, city_id: CityId },
    /// An incoming order crossing the book, funded by its own reservation
    Order(OrderId),
}

/// Committed result of one settlement
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub transaction: Transaction,
    /// The order executed against, after the fill
    pub order: Order,
    /// The incoming order, after the fill, when it was an order
    pub counter_order: Option<Order>,
}

/// Atomic multi-leg transfers
#[derive(Clone)]
pub struct SettlementService {
    store: Arc<Store>,
    tax: TaxPolicy,
    max_retries: u32,
}

impl SettlementService {
    pub fn new(store: Arc<Store>, tax: TaxPolicy, max_retries: u32) -> Self {
        Self {
            store,
            tax,
            max_retries,
        }
    }

    pub fn tax(&self) -> &TaxPolicy {
        &self.tax
    }

    /// Fill up to `quantity` of `order_id` against `counterparty`
    pub fn settle(
        &self,
        order_id: OrderId,
        quantity: u64,
        counterparty: Counterparty,
        now: DateTime<Utc>,
    ) -> Result<Fill, MarketError> {
        let fill = with_retry("settle", self.max_retries, || {
            let mut cs = self.store.changeset();
            let transaction = self.stage_fill(&mut cs, order_id, quantity, counterparty, now)?;
            let record = self.store.commit(cs, now)?;
            let counter_order = match counterparty {
                Counterparty::Order(id) => Some(committed_order(record.orders.clone(), id)?),
                Counterparty::Account { .. } => None,
            };
            let order = committed_order(record.orders, order_id)?;
            Ok(Fill {
                transaction,
                order,
                counter_order,
            })
        })?;

        let tx = &fill.transaction;
        info!(
            transaction_id = %tx.id,
            order_id = %tx.order_id,
            buyer = %tx.buyer_id,
            seller = %tx.seller_id,
            resource = %tx.resource_type,
            quantity = tx.quantity,
            price = %tx.price_per_unit,
            total = %tx.total_price,
            tax = %tx.tax_amount,
            remaining = fill.order.remaining_quantity,
            "Fill settled"
        );
        Ok(fill)
    }

    fn stage_fill(
        &self,
        cs: &mut Changeset<'_>,
        order_id: OrderId,
        requested: u64,
        counterparty: Counterparty,
        now: DateTime<Utc>,
    ) -> Result<Transaction, CommitError> {
        let order = cs.order(order_id)?.clone();
        ensure_fillable(&order, now)?;

        let counter_order = match counterparty {
            Counterparty::Order(id) => {
                let taker = cs.order(id)?.clone();
                if !taker.is_executable_at(now) {
                    return Err(MarketError::OrderUnavailable { order_id: id }.into());
                }
                if taker.side == order.side
                    || taker.resource_type != order.resource_type
                    || !crossing::incoming_can_match(taker.side, taker.price_per_unit, order.price_per_unit)
                {
                    return Err(MarketError::Validation(format!("order {} does not cross order {}", id, order_id)).into());
                }
                Some(taker)
            }
            Counterparty::Account { .. } => None,
        };

        let (counter_user, counter_city, counter_remaining) = match (&counterparty, &counter_order) {
            (_, Some(taker)) => (taker.owner_id, taker.owner_city_id, taker.remaining_quantity),
            (Counterparty::Account { user_id, city_id }, None) => (*user_id, *city_id, u64::MAX),
            (Counterparty::Order(id), None) => {
                return Err(MarketError::OrderNotFound { order_id: *id }.into());
            }
        };
        if counter_user == order.owner_id {
            return Err(MarketError::SelfTrade.into());
        }

        let quantity = requested.min(order.remaining_quantity).min(counter_remaining);
        if quantity == 0 {
            return Err(MarketError::OrderAlreadyFilled { order_id }.into());
        }

        let parties = match order.side {
            Side::Sell => Parties {
                buyer_id: counter_user,
                buyer_city_id: counter_city,
                seller_id: order.owner_id,
                seller_city_id: order.owner_city_id,
            },
            Side::Buy => Parties {
                buyer_id: order.owner_id,
                buyer_city_id: order.owner_city_id,
                seller_id: counter_user,
                seller_city_id: counter_city,
            },
        };
        let transaction = Transaction::record(
            order.id,
            counter_order.as_ref().map(|o| o.id),
            parties,
            order.resource_type,
            quantity,
            order.price_per_unit,
            &self.tax,
            now,
        )?;
        let resource = order.resource_type;
        let units = Decimal::from(quantity);
        let total = transaction.total_price;

        // Buyer pays
        let buyer_gold = LedgerKey::city(parties.buyer_city_id, ResourceType::CURRENCY);
        match (order.side, &counter_order) {
            (Side::Buy, _) => cs.ledger_mut(buyer_gold).consume_reserved(total)?,
            (Side::Sell, None) => cs.ledger_mut(buyer_gold).debit(total)?,
            (Side::Sell, Some(taker)) => {
                cs.ledger_mut(buyer_gold).consume_reserved(total)?;
                let improvement = crossing::price_improvement(taker.price_per_unit, order.price_per_unit, quantity)
                    .ok_or(LedgerError::Overflow)?;
                if improvement > Decimal::ZERO {
                    cs.ledger_mut(buyer_gold).release(improvement)?;
                }
            }
        }

        // Seller delivers
        let seller_stock = LedgerKey::city(parties.seller_city_id, resource);
        match (order.side, &counter_order) {
            (Side::Sell, _) | (Side::Buy, Some(_)) => cs.ledger_mut(seller_stock).consume_reserved(units)?,
            (Side::Buy, None) => cs.ledger_mut(seller_stock).debit(units)?,
        }

        // Receiving legs
        cs.ledger_mut(LedgerKey::city(parties.buyer_city_id, resource)).credit(units)?;
        let proceeds = transaction.seller_proceeds();
        if proceeds > Decimal::ZERO {
            cs.ledger_mut(LedgerKey::city(parties.seller_city_id, ResourceType::CURRENCY))
                .credit(proceeds)?;
        }
        if transaction.tax_amount > Decimal::ZERO {
            cs.ledger_mut(LedgerKey::treasury(ResourceType::CURRENCY))
                .credit(transaction.tax_amount)?;
        }

        cs.order_mut(order_id)?.apply_fill(quantity, now)?;
        if let Some(taker) = &counter_order {
            cs.order_mut(taker.id)?.apply_fill(quantity, now)?;
        }
        cs.push_transaction(transaction.clone());
        Ok(transaction)
    }
}

/// Reject fills against orders that cannot take one
pub(crate) fn ensure_fillable(order: &Order, now: DateTime<Utc>) -> Result<(), MarketError> {
    match order.status {
        OrderStatus::Completed => Err(MarketError::OrderAlreadyFilled { order_id: order.id }),
        OrderStatus::Cancelled | OrderStatus::Expired => Err(MarketError::OrderUnavailable { order_id: order.id }),
        OrderStatus::Active if order.remaining_quantity == 0 => {
            Err(MarketError::OrderAlreadyFilled { order_id: order.id })
        }
        OrderStatus::Active if order.is_expired_at(now) => Err(MarketError::OrderUnavailable { order_id: order.id }),
        OrderStatus::Active => Ok(()),
    }
}

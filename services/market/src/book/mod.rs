//! Order book
//!
//! Orders are created with their offered side already reserved in the
//! ledger, stay visible while active, and are closed by fills, cancellation
//! or expiry. The price-level structures below index the active orders for
//! price-time ordered listing and crossing.

pub mod ask_book;
pub mod bid_book;
pub mod index;
pub mod price_level;

pub use ask_book::AskBook;
pub use bid_book::BidBook;
pub use index::BookIndex;
pub use price_level::{LevelEntry, PriceLevel};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use types::errors::{LedgerError, MarketError};
use types::ids::{CityId, OrderId, UserId};
use types::numeric::{MAX_QUANTITY, Price};
use types::order::{Order, OrderStatus, Side};
use types::resource::ResourceType;
use types::transaction::Transaction;

use crate::config::MarketConfig;
use crate::directory::CityDirectory;
use crate::retry::with_retry;
use crate::store::{Changeset, CommitError, Store};

/// Request to place an order
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub owner_id: UserId,
    pub city_id: CityId,
    pub side: Side,
    pub resource_type: ResourceType,
    pub quantity: u64,
    pub price_per_unit: Price,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a cancel request found
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The order was active and is now cancelled, remainder released
    Cancelled(Order),
    /// The order had already reached a terminal state; nothing changed
    AlreadyClosed(Order),
}

impl CancelOutcome {
    pub fn order(&self) -> &Order {
        match self {
            CancelOutcome::Cancelled(order) | CancelOutcome::AlreadyClosed(order) => order,
        }
    }

    /// The cancelled order, treating an already closed order as misuse
    pub fn into_cancelled(self) -> Result<Order, MarketError> {
        match self {
            CancelOutcome::Cancelled(order) => Ok(order),
            CancelOutcome::AlreadyClosed(order) => Err(MarketError::InvalidState {
                order_id: order.id,
                status: order.status,
            }),
        }
    }
}

/// Order store operations
#[derive(Clone)]
pub struct OrderBook {
    store: Arc<Store>,
    directory: Arc<dyn CityDirectory>,
    config: Arc<MarketConfig>,
}

impl OrderBook {
    pub fn new(store: Arc<Store>, directory: Arc<dyn CityDirectory>, config: Arc<MarketConfig>) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    /// Reserve the offered side and publish the order
    ///
    /// The reservation and the order row commit together: if the balance
    /// is short the caller gets `InsufficientFunds` and no order exists.
    pub fn create_order(&self, request: NewOrder, now: DateTime<Utc>) -> Result<Order, MarketError> {
        validate(&request, now)?;
        if !self.directory.is_owner(request.owner_id, request.city_id) {
            return Err(MarketError::CityNotOwned {
                user_id: request.owner_id,
                city_id: request.city_id,
            });
        }

        let order = Order::new(
            request.owner_id,
            request.city_id,
            request.side,
            request.resource_type,
            request.quantity,
            request.price_per_unit,
            request.expires_at,
            now,
        );
        let reservation = order
            .reservation_for(order.quantity)
            .ok_or_else(|| MarketError::Validation("order value is too large".to_string()))?;

        let record = with_retry("create_order", self.config.max_retries, || {
            let mut cs = self.store.changeset();
            cs.ledger_mut(order.reservation_key()).reserve(reservation)?;
            cs.insert_order(order.clone());
            self.store.commit(cs, now)
        })?;

        let created = record
            .orders
            .into_iter()
            .find(|o| o.id == order.id)
            .unwrap_or(order);
        info!(
            order_id = %created.id,
            owner = %created.owner_id,
            side = %created.side,
            resource = %created.resource_type,
            quantity = created.quantity,
            price = %created.price_per_unit,
            "Order created"
        );
        Ok(created)
    }

    /// Cancel an order and release what it still holds
    ///
    /// A fill that commits first simply shrinks what gets released. An order
    /// that is already terminal is reported back unchanged.
    pub fn cancel_order(
        &self,
        order_id: OrderId,
        requester: UserId,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, MarketError> {
        let outcome = with_retry("cancel_order", self.config.max_retries, || {
            let mut cs = self.store.changeset();
            let current = cs.order(order_id)?;
            if current.owner_id != requester {
                return Err(MarketError::NotOwner {
                    order_id,
                    requester,
                }
                .into());
            }
            if current.status.is_terminal() {
                return Ok(CancelOutcome::AlreadyClosed(current.clone()));
            }
            stage_close(&mut cs, order_id, OrderStatus::Cancelled, now)?;
            let record = self.store.commit(cs, now)?;
            let cancelled = committed_order(record.orders, order_id)?;
            Ok(CancelOutcome::Cancelled(cancelled))
        })?;

        match &outcome {
            CancelOutcome::Cancelled(order) => info!(
                order_id = %order.id,
                released_quantity = order.remaining_quantity,
                "Order cancelled"
            ),
            CancelOutcome::AlreadyClosed(order) => info!(
                order_id = %order.id,
                status = %order.status,
                "Cancel of closed order ignored"
            ),
        }
        Ok(outcome)
    }

    /// Expire an active order whose expiry has passed
    ///
    /// Returns `None` when there was nothing to do: the order is already
    /// terminal (another sweeper or a fill got there first) or not yet due.
    pub fn expire_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Option<Order>, MarketError> {
        with_retry("expire_order", self.config.max_retries, || {
            let mut cs = self.store.changeset();
            let current = cs.order(order_id)?;
            if !current.is_active() || !current.is_expired_at(now) {
                return Ok(None);
            }
            stage_close(&mut cs, order_id, OrderStatus::Expired, now)?;
            let record = self.store.commit(cs, now)?;
            Ok(Some(committed_order(record.orders, order_id)?))
        })
    }

    /// One order, any status
    pub fn get(&self, order_id: OrderId) -> Result<Order, MarketError> {
        self.store
            .order(&order_id)
            .ok_or(MarketError::OrderNotFound { order_id })
    }

    /// Active orders in price-time priority
    ///
    /// Sells (lowest ask first) then buys (highest bid first) when no side
    /// is given. Orders past their expiry are hidden even before the sweeper
    /// closes them.
    pub fn list_active(
        &self,
        resource_type: ResourceType,
        side: Option<Side>,
        limit: Option<usize>,
        offset: usize,
        now: DateTime<Utc>,
    ) -> Vec<Order> {
        let limit = self.config.page_size(limit);
        let sides: &[Side] = match side {
            Some(Side::Sell) => &[Side::Sell],
            Some(Side::Buy) => &[Side::Buy],
            None => &[Side::Sell, Side::Buy],
        };
        let ids: Vec<OrderId> = self.store.with_index(|index| {
            sides
                .iter()
                .flat_map(|side| index.entries(resource_type, *side, now))
                .skip(offset)
                .take(limit)
                .map(|(_, entry)| entry.order_id)
                .collect()
        });
        // Index lock released before rows are read
        ids.into_iter()
            .filter_map(|id| self.store.order(&id))
            .filter(|order| order.is_executable_at(now))
            .collect()
    }

    /// A user's orders, newest first
    pub fn orders_of(&self, user_id: UserId, status: Option<OrderStatus>, limit: Option<usize>) -> Vec<Order> {
        let mut orders = self
            .store
            .scan_orders(|order| order.owner_id == user_id && status.map_or(true, |s| order.status == s));
        orders.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        orders.truncate(self.config.page_size(limit));
        orders
    }

    /// Trades a user took part in, newest first
    pub fn transactions_of(&self, user_id: UserId, limit: Option<usize>) -> Vec<Transaction> {
        let limit = self.config.page_size(limit);
        self.store.with_transactions(|all| {
            all.iter()
                .rev()
                .filter(|tx| tx.involves(user_id))
                .take(limit)
                .cloned()
                .collect()
        })
    }
}

fn validate(request: &NewOrder, now: DateTime<Utc>) -> Result<(), MarketError> {
    if request.quantity == 0 {
        return Err(MarketError::Validation("quantity must be positive".to_string()));
    }
    if request.quantity > MAX_QUANTITY {
        return Err(MarketError::Validation(format!(
            "quantity {} exceeds maximum {}",
            request.quantity, MAX_QUANTITY
        )));
    }
    if request.resource_type.is_currency() {
        return Err(MarketError::Validation(format!(
            "{} is the market currency and cannot be traded",
            request.resource_type
        )));
    }
    if let Some(expires_at) = request.expires_at {
        if expires_at <= now {
            return Err(MarketError::Validation("expiresAt must be in the future".to_string()));
        }
    }
    Ok(())
}

/// Close an active order inside a changeset and release its remainder
pub(crate) fn stage_close(
    cs: &mut Changeset<'_>,
    order_id: OrderId,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> Result<(), CommitError> {
    let order = cs.order_mut(order_id)?;
    order.close(status, now)?;
    let key = order.reservation_key();
    let release = order
        .reservation_for(order.remaining_quantity)
        .ok_or(LedgerError::Overflow)?;
    if release > Decimal::ZERO {
        cs.ledger_mut(key).release(release)?;
    }
    Ok(())
}

pub(crate) fn committed_order(orders: Vec<Order>, order_id: OrderId) -> Result<Order, CommitError> {
    orders
        .into_iter()
        .find(|order| order.id == order_id)
        .ok_or(CommitError::Fatal(MarketError::OrderNotFound { order_id }))
}

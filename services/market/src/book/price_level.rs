//! Price level implementation with FIFO queue
//!
//! A price level contains all active orders at one price point, ordered by
//! creation time (ties broken by order id) to enforce time priority.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use types::ids::{OrderId, UserId};
use types::order::Order;

/// A price level containing orders at a specific price
#[derive(Debug, Clone)]
pub struct PriceLevel {
    /// Queue of orders at this price level (earliest first)
    orders: VecDeque<LevelEntry>,
    /// Sum of remaining quantity at this level
    total_quantity: u64,
}

/// Entry in the price level queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelEntry {
    pub order_id: OrderId,
    pub owner_id: UserId,
    pub remaining: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LevelEntry {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            owner_id: order.owner_id,
            remaining: order.remaining_quantity,
            created_at: order.created_at,
            expires_at: order.expires_at,
        }
    }

    fn priority(&self) -> (DateTime<Utc>, OrderId) {
        (self.created_at, self.order_id)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl PriceLevel {
    /// Create a new empty price level
    pub fn new() -> Self {
        Self {
            orders: VecDeque::new(),
            total_quantity: 0,
        }
    }

    /// Insert an entry at its time-priority position, or refresh the
    /// remaining quantity if the order is already queued
    pub fn upsert(&mut self, entry: LevelEntry) {
        if let Some(existing) = self.orders.iter_mut().find(|e| e.order_id == entry.order_id) {
            self.total_quantity = self
                .total_quantity
                .saturating_sub(existing.remaining)
                .saturating_add(entry.remaining);
            existing.remaining = entry.remaining;
            return;
        }
        self.total_quantity = self.total_quantity.saturating_add(entry.remaining);
        // Commits mostly arrive in creation order, so this is usually the back
        let position = self
            .orders
            .partition_point(|e| e.priority() <= entry.priority());
        self.orders.insert(position, entry);
    }

    /// Remove an order from the queue by OrderId
    ///
    /// Returns the remaining quantity of the removed order, or None if not found
    pub fn remove(&mut self, order_id: &OrderId) -> Option<u64> {
        let position = self.orders.iter().position(|entry| &entry.order_id == order_id)?;
        let entry = self.orders.remove(position)?;
        self.total_quantity = self.total_quantity.saturating_sub(entry.remaining);
        Some(entry.remaining)
    }

    /// Peek at the order with time priority
    pub fn front(&self) -> Option<&LevelEntry> {
        self.orders.front()
    }

    /// Entries in time-priority order
    pub fn iter(&self) -> impl Iterator<Item = &LevelEntry> {
        self.orders.iter()
    }

    /// Check if the price level is empty
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Get the total remaining quantity at this price level
    pub fn total_quantity(&self) -> u64 {
        self.total_quantity
    }

    /// Get the number of orders at this level
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::new()
    }
}

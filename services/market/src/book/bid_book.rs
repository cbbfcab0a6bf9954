//! Bid (buy-side) order book
//!
//! Maintains buy orders sorted by price descending (best bid first).
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::Price;

use super::price_level::{LevelEntry, PriceLevel};

/// Bid (buy) side order book
///
/// Orders are sorted by price descending, so the highest bid is first.
/// At each price level, orders are maintained in FIFO order.
#[derive(Debug, Clone)]
pub struct BidBook {
    /// Price levels keyed by price; iterated in reverse for priority
    levels: BTreeMap<Price, PriceLevel>,
}

impl BidBook {
    /// Create a new empty bid book
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Insert an order, or refresh its remaining quantity
    pub fn upsert(&mut self, price: Price, entry: LevelEntry) {
        self.levels.entry(price).or_default().upsert(entry);
    }

    /// Remove an order from the bid book
    ///
    /// Returns true if the order was found and removed
    pub fn remove(&mut self, order_id: &OrderId, price: Price) -> bool {
        if let Some(level) = self.levels.get_mut(&price) {
            if level.remove(order_id).is_some() {
                // Remove empty price levels to keep book clean
                if level.is_empty() {
                    self.levels.remove(&price);
                }
                return true;
            }
        }
        false
    }

    /// Get the best bid (highest price) with its total quantity
    pub fn best_bid(&self) -> Option<(Price, u64)> {
        // BTreeMap iter is ascending, so we need last()
        self.levels
            .iter()
            .next_back()
            .map(|(price, level)| (*price, level.total_quantity()))
    }

    /// Price levels in priority order (highest price first)
    pub fn levels(&self) -> impl Iterator<Item = (Price, &PriceLevel)> {
        self.levels.iter().rev().map(|(price, level)| (*price, level))
    }

    /// Get depth snapshot (top N price levels): price, quantity, orders
    pub fn depth_snapshot(&self, depth: usize) -> Vec<(Price, u64, usize)> {
        self.levels()
            .take(depth)
            .map(|(price, level)| (price, level.total_quantity(), level.order_count()))
            .collect()
    }

    /// Check if the bid book is empty
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Get the total number of price levels
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}

impl Default for BidBook {
    fn default() -> Self {
        Self::new()
    }
}

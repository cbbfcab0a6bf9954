//! Ask (sell-side) order book
//!
//! Maintains sell orders sorted by price ascending (best ask first).
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::Price;

use super::price_level::{LevelEntry, PriceLevel};

/// Ask (sell) side order book
///
/// Orders are sorted by price ascending, so the lowest ask is first.
/// At each price level, orders are maintained in FIFO order.
#[derive(Debug, Clone)]
pub struct AskBook {
    /// Price levels sorted ascending (lowest price first)
    levels: BTreeMap<Price, PriceLevel>,
}

impl AskBook {
    /// Create a new empty ask book
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Insert an order, or refresh its remaining quantity
    pub fn upsert(&mut self, price: Price, entry: LevelEntry) {
        self.levels.entry(price).or_default().upsert(entry);
    }

    /// Remove an order from the ask book
    ///
    /// Returns true if the order was found and removed
    pub fn remove(&mut self, order_id: &OrderId, price: Price) -> bool {
        if let Some(level) = self.levels.get_mut(&price) {
            if level.remove(order_id).is_some() {
                if level.is_empty() {
                    self.levels.remove(&price);
                }
                return true;
            }
        }
        false
    }

    /// Get the best ask (lowest price) with its total quantity
    pub fn best_ask(&self) -> Option<(Price, u64)> {
        self.levels
            .iter()
            .next()
            .map(|(price, level)| (*price, level.total_quantity()))
    }

    /// Price levels in priority order (lowest price first)
    pub fn levels(&self) -> impl Iterator<Item = (Price, &PriceLevel)> {
        self.levels.iter().map(|(price, level)| (*price, level))
    }

    /// Get depth snapshot (top N price levels): price, quantity, orders
    pub fn depth_snapshot(&self, depth: usize) -> Vec<(Price, u64, usize)> {
        self.levels()
            .take(depth)
            .map(|(price, level)| (price, level.total_quantity(), level.order_count()))
            .collect()
    }

    /// Check if the ask book is empty
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Get the total number of price levels
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}

impl Default for AskBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use types::ids::UserId;

    fn entry(remaining: u64, offset_secs: i64) -> LevelEntry {
        LevelEntry {
            order_id: OrderId::new(),
            owner_id: UserId(3),
            remaining,
            created_at: Utc::now() + Duration::seconds(offset_secs),
            expires_at: None,
        }
    }

    #[test]
    fn test_ask_book_best_ask() {
        let mut book = AskBook::new();
        book.upsert(Price::from_u64(50), entry(10, 0));
        book.upsert(Price::from_u64(49), entry(20, 1));
        book.upsert(Price::from_u64(51), entry(15, 2));

        assert_eq!(book.best_ask(), Some((Price::from_u64(49), 20)));
    }

    #[test]
    fn test_ask_book_levels_ascending() {
        let mut book = AskBook::new();
        book.upsert(Price::from_u64(7), entry(1, 0));
        book.upsert(Price::from_u64(5), entry(1, 1));
        book.upsert(Price::from_u64(6), entry(1, 2));

        let prices: Vec<_> = book.levels().map(|(p, _)| p).collect();
        assert_eq!(prices, vec![Price::from_u64(5), Price::from_u64(6), Price::from_u64(7)]);
    }

    #[test]
    fn test_ask_book_remove_drops_empty_level() {
        let mut book = AskBook::new();
        let a = entry(10, 0);
        let b = entry(10, 1);
        let a_id = a.order_id;
        book.upsert(Price::from_u64(5), a);
        book.upsert(Price::from_u64(5), b);

        assert!(book.remove(&a_id, Price::from_u64(5)));
        assert_eq!(book.level_count(), 1);
        assert_eq!(book.best_ask(), Some((Price::from_u64(5), 10)));
    }

    #[test]
    fn test_ask_book_depth_snapshot() {
        let mut book = AskBook::new();
        book.upsert(Price::from_u64(5), entry(10, 0));
        book.upsert(Price::from_u64(6), entry(4, 1));
        book.upsert(Price::from_u64(8), entry(3, 2));

        let depth = book.depth_snapshot(2);
        assert_eq!(depth, vec![(Price::from_u64(5), 10, 1), (Price::from_u64(6), 4, 1)]);
    }
}

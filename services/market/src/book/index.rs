//! Price-time index of active orders
//!
//! The index mirrors the order table: every commit reconciles the orders it
//! touched, so an order is indexed exactly while it is active with quantity
//! left. Rows are the source of truth; the index only answers "which orders,
//! in which order".

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use types::ids::OrderId;
use types::numeric::Price;
use types::order::{Order, Side};
use types::resource::ResourceType;

use super::ask_book::AskBook;
use super::bid_book::BidBook;
use super::price_level::{LevelEntry, PriceLevel};
use crate::matching::crossing;

/// Both sides of one resource's book
#[derive(Debug, Clone, Default)]
pub struct SideBooks {
    pub bids: BidBook,
    pub asks: AskBook,
}

impl SideBooks {
    fn levels(&self, side: Side) -> Box<dyn Iterator<Item = (Price, &PriceLevel)> + '_> {
        match side {
            Side::Buy => Box::new(self.bids.levels()),
            Side::Sell => Box::new(self.asks.levels()),
        }
    }
}

/// Index of every active order, per resource
#[derive(Debug, Default)]
pub struct BookIndex {
    books: HashMap<ResourceType, SideBooks>,
}

impl BookIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the index in line with an order's committed state
    pub fn reconcile(&mut self, order: &Order) {
        let books = self.books.entry(order.resource_type).or_default();
        let price = order.price_per_unit;
        if order.is_active() && order.remaining_quantity > 0 {
            let entry = LevelEntry::from_order(order);
            match order.side {
                Side::Buy => books.bids.upsert(price, entry),
                Side::Sell => books.asks.upsert(price, entry),
            }
        } else {
            match order.side {
                Side::Buy => books.bids.remove(&order.id, price),
                Side::Sell => books.asks.remove(&order.id, price),
            };
        }
    }

    pub fn book(&self, resource: ResourceType) -> Option<&SideBooks> {
        self.books.get(&resource)
    }

    /// Unexpired entries of one side in price-time priority
    pub fn entries(
        &self,
        resource: ResourceType,
        side: Side,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = (Price, &LevelEntry)> + '_ {
        self.books
            .get(&resource)
            .into_iter()
            .flat_map(move |books| books.levels(side))
            .flat_map(|(price, level)| level.iter().map(move |entry| (price, entry)))
            .filter(move |(_, entry)| !entry.is_expired_at(now))
    }

    /// Resting orders an incoming order crosses, best first
    ///
    /// Orders of the same owner are skipped; they can never fill each other.
    pub fn crossing(&self, taker: &Order, now: DateTime<Utc>, limit: usize) -> Vec<OrderId> {
        let taker_price = taker.price_per_unit;
        self.entries(taker.resource_type, taker.side.opposite(), now)
            .take_while(|(price, _)| crossing::incoming_can_match(taker.side, taker_price, *price))
            .filter(|(_, entry)| entry.owner_id != taker.owner_id && entry.order_id != taker.id)
            .map(|(_, entry)| entry.order_id)
            .take(limit)
            .collect()
    }

    /// Active orders whose expiry has passed, oldest expiry first
    pub fn expired(&self, now: DateTime<Utc>, limit: usize) -> Vec<OrderId> {
        let mut due: Vec<(DateTime<Utc>, OrderId)> = self
            .books
            .values()
            .flat_map(|books| books.levels(Side::Buy).chain(books.levels(Side::Sell)))
            .flat_map(|(_, level)| level.iter())
            .filter_map(|entry| match entry.expires_at {
                Some(at) if at <= now => Some((at, entry.order_id)),
                _ => None,
            })
            .collect();
        due.sort();
        due.into_iter().take(limit).map(|(_, id)| id).collect()
    }

    /// Number of indexed orders across all books
    pub fn len(&self) -> usize {
        self.books
            .values()
            .flat_map(|books| books.levels(Side::Buy).chain(books.levels(Side::Sell)))
            .map(|(_, level)| level.order_count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use types::ids::{CityId, UserId};

    fn order(owner: u64, side: Side, qty: u64, price: u64, at: DateTime<Utc>) -> Order {
        Order::new(
            UserId(owner),
            CityId(owner * 10),
            side,
            ResourceType::Metal,
            qty,
            Price::from_u64(price),
            None,
            at,
        )
    }

    #[test]
    fn test_reconcile_tracks_lifecycle() {
        let mut index = BookIndex::new();
        let now = Utc::now();
        let mut o = order(1, Side::Sell, 10, 5, now);

        index.reconcile(&o);
        assert_eq!(index.len(), 1);

        o.apply_fill(4, now).unwrap();
        index.reconcile(&o);
        let book = index.book(ResourceType::Metal).unwrap();
        assert_eq!(book.asks.best_ask(), Some((Price::from_u64(5), 6)));

        o.apply_fill(6, now).unwrap();
        index.reconcile(&o);
        assert!(index.is_empty());
    }

    #[test]
    fn test_entries_in_price_time_priority() {
        let mut index = BookIndex::new();
        let t0 = Utc::now();
        let cheap_late = order(1, Side::Sell, 1, 4, t0 + Duration::seconds(2));
        let dear = order(2, Side::Sell, 1, 6, t0);
        let cheap_early = order(3, Side::Sell, 1, 4, t0 + Duration::seconds(1));
        for o in [&cheap_late, &dear, &cheap_early] {
            index.reconcile(o);
        }

        let ids: Vec<_> = index
            .entries(ResourceType::Metal, Side::Sell, t0)
            .map(|(_, e)| e.order_id)
            .collect();
        assert_eq!(ids, vec![cheap_early.id, cheap_late.id, dear.id]);
    }

    #[test]
    fn test_crossing_stops_at_limit_price_and_skips_own_orders() {
        let mut index = BookIndex::new();
        let t0 = Utc::now();
        let own = order(9, Side::Sell, 5, 4, t0);
        let a = order(1, Side::Sell, 5, 4, t0 + Duration::seconds(1));
        let b = order(2, Side::Sell, 5, 5, t0);
        let c = order(3, Side::Sell, 5, 6, t0);
        for o in [&own, &a, &b, &c] {
            index.reconcile(o);
        }

        let taker = order(9, Side::Buy, 20, 5, t0 + Duration::seconds(3));
        assert_eq!(index.crossing(&taker, t0, 10), vec![a.id, b.id]);
        assert_eq!(index.crossing(&taker, t0, 1), vec![a.id]);
    }

    #[test]
    fn test_expired_lists_due_orders_only() {
        let mut index = BookIndex::new();
        let now = Utc::now();
        let mut due = order(1, Side::Buy, 1, 3, now - Duration::hours(2));
        due.expires_at = Some(now - Duration::minutes(1));
        let mut later = order(2, Side::Buy, 1, 3, now);
        later.expires_at = Some(now + Duration::hours(1));
        let forever = order(3, Side::Sell, 1, 3, now);
        for o in [&due, &later, &forever] {
            index.reconcile(o);
        }

        assert_eq!(index.expired(now, 10), vec![due.id]);
        // Expired entries are hidden from listings even before the sweep
        assert_eq!(index.entries(ResourceType::Metal, Side::Buy, now).count(), 1);
    }
}

//! Matching engine core
//!
//! Decides what to settle. Explicit execution targets one visible order
//! chosen by a player; auto-cross walks the opposing book for a newly placed
//! order in price-time priority. Ledger mutation is left entirely to the
//! settlement service.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use types::errors::MarketError;
use types::ids::{CityId, OrderId, UserId};

use crate::book::OrderBook;
use crate::directory::CityDirectory;
use crate::settlement::{ensure_fillable, Counterparty, Fill, SettlementService};
use crate::store::Store;

/// Main matching engine
#[derive(Clone)]
pub struct MatchingEngine {
    store: Arc<Store>,
    book: OrderBook,
    settlement: SettlementService,
    directory: Arc<dyn CityDirectory>,
    cross_scan: usize,
}

impl MatchingEngine {
    pub fn new(
        store: Arc<Store>,
        book: OrderBook,
        settlement: SettlementService,
        directory: Arc<dyn CityDirectory>,
        cross_scan: usize,
    ) -> Self {
        Self {
            store,
            book,
            settlement,
            directory,
            cross_scan: cross_scan.max(1),
        }
    }

    /// Fill up to `quantity` units of a chosen order
    ///
    /// The fill may be smaller than requested when the order has less
    /// left; it is never larger.
    pub fn execute(
        &self,
        order_id: OrderId,
        quantity: u64,
        executor_id: UserId,
        executor_city_id: CityId,
        now: DateTime<Utc>,
    ) -> Result<Fill, MarketError> {
        if quantity == 0 {
            return Err(MarketError::Validation("quantity must be positive".to_string()));
        }
        if !self.directory.is_owner(executor_id, executor_city_id) {
            return Err(MarketError::CityNotOwned {
                user_id: executor_id,
                city_id: executor_city_id,
            });
        }

        let order = self.book.get(order_id)?;
        ensure_fillable(&order, now)?;
        if order.owner_id == executor_id {
            return Err(MarketError::SelfTrade);
        }

        let fill_qty = quantity.min(order.remaining_quantity);
        debug!(%order_id, requested = quantity, fill_qty, "Executing order");
        self.settlement.settle(
            order_id,
            fill_qty,
            Counterparty::Account {
                user_id: executor_id,
                city_id: executor_city_id,
            },
            now,
        )
    }

    /// Match a freshly placed order against crossing resting orders
    ///
    /// Fills run at each resting order's price until the incoming order is
    /// exhausted or the book no longer crosses. A resting order that was
    /// filled, cancelled or contended in the meantime is skipped.
    pub fn auto_cross(&self, taker_id: OrderId, now: DateTime<Utc>) -> Result<Vec<Fill>, MarketError> {
        let mut fills = Vec::new();
        loop {
            let taker = self.book.get(taker_id)?;
            if !taker.is_executable_at(now) {
                break;
            }
            let candidates = self
                .store
                .with_index(|index| index.crossing(&taker, now, self.cross_scan));
            if candidates.is_empty() {
                break;
            }

            let mut progressed = false;
            for maker_id in candidates {
                match self
                    .settlement
                    .settle(maker_id, u64::MAX, Counterparty::Order(taker_id), now)
                {
                    Ok(fill) => {
                        progressed = true;
                        let taker_done = fill
                            .counter_order
                            .as_ref()
                            .map_or(true, |taker| !taker.is_active());
                        fills.push(fill);
                        if taker_done {
                            break;
                        }
                    }
                    // The incoming order itself went away: stop crossing
                    Err(MarketError::OrderUnavailable { order_id } | MarketError::OrderAlreadyFilled { order_id })
                        if order_id == taker_id =>
                    {
                        return Ok(fills);
                    }
                    Err(
                        err @ (MarketError::OrderUnavailable { .. }
                        | MarketError::OrderAlreadyFilled { .. }
                        | MarketError::ConcurrencyConflict { .. }
                        | MarketError::SelfTrade),
                    ) => {
                        debug!(%taker_id, %maker_id, error = %err, "Skipping resting order");
                    }
                    Err(err) => return Err(err),
                }
            }
            if !progressed {
                break;
            }
        }

        if !fills.is_empty() {
            let filled: u64 = fills.iter().map(|f| f.transaction.quantity).sum();
            info!(%taker_id, fills = fills.len(), filled, "Incoming order crossed the book");
        }
        Ok(fills)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::NewOrder;
    use crate::config::MarketConfig;
    use crate::directory::InMemoryCityDirectory;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use types::commit::NullSink;
    use types::fee::TaxPolicy;
    use types::ledger::LedgerKey;
    use types::numeric::Price;
    use types::order::{Order, OrderStatus, Side};
    use types::resource::ResourceType;

    struct Fixture {
        store: Arc<Store>,
        book: OrderBook,
        engine: MatchingEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::new(Arc::new(NullSink)));
        let directory = Arc::new(InMemoryCityDirectory::new());
        for user in 1..=3 {
            directory.assign(CityId(user * 10), UserId(user));
        }
        let config = Arc::new(MarketConfig::default());
        let book = OrderBook::new(store.clone(), directory.clone(), config.clone());
        let settlement = SettlementService::new(store.clone(), TaxPolicy::default(), config.max_retries);
        let engine = MatchingEngine::new(store.clone(), book.clone(), settlement, directory, config.cross_scan);
        Fixture { store, book, engine }
    }

    fn fund(store: &Store, user: u64, resource: ResourceType, amount: Decimal) {
        let mut cs = store.changeset();
        cs.ledger_mut(LedgerKey::city(CityId(user * 10), resource))
            .credit(amount)
            .unwrap();
        store.commit(cs, Utc::now()).unwrap();
    }

    fn place(book: &OrderBook, user: u64, side: Side, qty: u64, price: u64, at: DateTime<Utc>) -> Order {
        book.create_order(
            NewOrder {
                owner_id: UserId(user),
                city_id: CityId(user * 10),
                side,
                resource_type: ResourceType::Metal,
                quantity: qty,
                price_per_unit: Price::from_u64(price),
                expires_at: None,
            },
            at,
        )
        .unwrap()
    }

    #[test]
    fn test_execute_clamps_to_remaining() {
        let f = fixture();
        fund(&f.store, 1, ResourceType::Metal, dec!(10));
        fund(&f.store, 2, ResourceType::Gold, dec!(100));
        let order = place(&f.book, 1, Side::Sell, 10, 5, Utc::now());

        let fill = f.engine.execute(order.id, 25, UserId(2), CityId(20), Utc::now()).unwrap();
        assert_eq!(fill.transaction.quantity, 10);
        assert_eq!(fill.order.status, OrderStatus::Completed);
    }

    #[test]
    fn test_execute_errors() {
        let f = fixture();
        fund(&f.store, 1, ResourceType::Metal, dec!(10));
        let order = place(&f.book, 1, Side::Sell, 10, 5, Utc::now());
        let now = Utc::now();

        assert!(matches!(
            f.engine.execute(order.id, 0, UserId(2), CityId(20), now),
            Err(MarketError::Validation(_))
        ));
        assert_eq!(
            f.engine.execute(order.id, 1, UserId(2), CityId(30), now).unwrap_err(),
            MarketError::CityNotOwned {
                user_id: UserId(2),
                city_id: CityId(30)
            }
        );
        let missing = OrderId::new();
        assert_eq!(
            f.engine.execute(missing, 1, UserId(2), CityId(20), now).unwrap_err(),
            MarketError::OrderNotFound { order_id: missing }
        );
        assert_eq!(
            f.engine.execute(order.id, 1, UserId(1), CityId(10), now).unwrap_err(),
            MarketError::SelfTrade
        );

        f.book.cancel_order(order.id, UserId(1), now).unwrap();
        assert_eq!(
            f.engine.execute(order.id, 1, UserId(2), CityId(20), now).unwrap_err(),
            MarketError::OrderUnavailable { order_id: order.id }
        );
    }

    #[test]
    fn test_execute_expired_but_unswept_order() {
        let f = fixture();
        fund(&f.store, 1, ResourceType::Metal, dec!(10));
        fund(&f.store, 2, ResourceType::Gold, dec!(100));
        let t0 = Utc::now();
        let order = f
            .book
            .create_order(
                NewOrder {
                    owner_id: UserId(1),
                    city_id: CityId(10),
                    side: Side::Sell,
                    resource_type: ResourceType::Metal,
                    quantity: 10,
                    price_per_unit: Price::from_u64(5),
                    expires_at: Some(t0 + Duration::minutes(1)),
                },
                t0,
            )
            .unwrap();

        let later = t0 + Duration::minutes(2);
        assert_eq!(
            f.engine.execute(order.id, 1, UserId(2), CityId(20), later).unwrap_err(),
            MarketError::OrderUnavailable { order_id: order.id }
        );
    }

    #[test]
    fn test_auto_cross_walks_book_in_priority() {
        let f = fixture();
        fund(&f.store, 1, ResourceType::Metal, dec!(100));
        fund(&f.store, 2, ResourceType::Metal, dec!(100));
        fund(&f.store, 3, ResourceType::Gold, dec!(1000));
        let t0 = Utc::now();
        let a = place(&f.book, 1, Side::Sell, 5, 5, t0);
        let b = place(&f.book, 2, Side::Sell, 5, 5, t0 + Duration::seconds(1));
        let c = place(&f.book, 1, Side::Sell, 5, 4, t0 + Duration::seconds(2));
        let dear = place(&f.book, 2, Side::Sell, 5, 9, t0 + Duration::seconds(3));

        let bid = place(&f.book, 3, Side::Buy, 12, 6, t0 + Duration::seconds(4));
        let fills = f.engine.auto_cross(bid.id, t0 + Duration::seconds(5)).unwrap();

        let makers: Vec<_> = fills.iter().map(|fill| (fill.order.id, fill.transaction.quantity)).collect();
        assert_eq!(makers, vec![(c.id, 5), (a.id, 5), (b.id, 2)]);
        assert!(fills.iter().all(|fill| fill.transaction.counter_order_id == Some(bid.id)));

        let bid_after = f.book.get(bid.id).unwrap();
        assert_eq!(bid_after.status, OrderStatus::Completed);
        assert!(f.book.get(dear.id).unwrap().is_active());

        // 12 units reserved at 6 = 72; paid 20 + 25 + 10 = 55; 17 refunded
        let gold = f.store.balance(&LedgerKey::city(CityId(30), ResourceType::Gold));
        assert_eq!((gold.available, gold.reserved), (dec!(945), Decimal::ZERO));
    }

    #[test]
    fn test_auto_cross_leaves_remainder_resting_and_skips_own_orders() {
        let f = fixture();
        fund(&f.store, 1, ResourceType::Metal, dec!(100));
        fund(&f.store, 1, ResourceType::Gold, dec!(100));
        fund(&f.store, 2, ResourceType::Gold, dec!(100));
        let t0 = Utc::now();
        let own_ask = place(&f.book, 1, Side::Sell, 5, 3, t0);
        let bid = place(&f.book, 2, Side::Buy, 10, 4, t0 + Duration::seconds(1));
        let ask = place(&f.book, 1, Side::Sell, 4, 4, t0 + Duration::seconds(2));
        let fills = f.engine.auto_cross(ask.id, t0 + Duration::seconds(3)).unwrap();

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].order.id, bid.id);
        assert_eq!(fills[0].order.remaining_quantity, 6);
        assert!(f.book.get(own_ask.id).unwrap().is_active());

        // Every ask at or below 5 belongs to user 1
        let own_bid = place(&f.book, 1, Side::Buy, 1, 5, t0 + Duration::seconds(4));
        assert!(f.engine.auto_cross(own_bid.id, t0 + Duration::seconds(5)).unwrap().is_empty());
        assert!(f.book.get(own_bid.id).unwrap().is_active());
    }
}

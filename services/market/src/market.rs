//! Market facade
//!
//! Wires the ledger, book, engine, settlement and sweeper over one store and
//! publishes events for everything that commits.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use types::commit::{CommitSink, StateImage};
use types::errors::MarketError;
use types::ids::{CityId, OrderId, UserId};
use types::ledger::{Holder, LedgerEntry};
use types::order::{Order, OrderStatus, Side};
use types::resource::ResourceType;
use types::transaction::Transaction;

use crate::book::{CancelOutcome, NewOrder, OrderBook};
use crate::config::MarketConfig;
use crate::directory::CityDirectory;
use crate::engine::MatchingEngine;
use crate::events::{EventBus, MarketEvent};
use crate::ledger::ResourceLedger;
use crate::settlement::{Fill, SettlementService};
use crate::stats::{market_stats, MarketStats};
use crate::store::Store;
use crate::sweeper::{ExpirationSweeper, SweepReport};

/// A placed order and whatever it filled on arrival
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    /// The order as it stands after crossing
    pub order: Order,
    pub fills: Vec<Transaction>,
}

pub struct Market {
    config: Arc<MarketConfig>,
    store: Arc<Store>,
    directory: Arc<dyn CityDirectory>,
    ledger: ResourceLedger,
    book: OrderBook,
    engine: MatchingEngine,
    sweeper: Arc<ExpirationSweeper>,
    events: EventBus,
}

impl Market {
    /// Empty market writing its commits to `sink`
    pub fn new(config: MarketConfig, directory: Arc<dyn CityDirectory>, sink: Arc<dyn CommitSink>) -> Self {
        Self::assemble(config, directory, Arc::new(Store::new(sink)))
    }

    /// Market rebuilt from a recovered image, writing new commits to `sink`
    pub fn restore(
        config: MarketConfig,
        directory: Arc<dyn CityDirectory>,
        sink: Arc<dyn CommitSink>,
        image: StateImage,
    ) -> Self {
        Self::assemble(config, directory, Arc::new(Store::restore(image, sink)))
    }

    fn assemble(config: MarketConfig, directory: Arc<dyn CityDirectory>, store: Arc<Store>) -> Self {
        let config = Arc::new(config);
        let events = EventBus::new(config.event_buffer);
        let ledger = ResourceLedger::new(store.clone(), config.max_retries);
        let book = OrderBook::new(store.clone(), directory.clone(), config.clone());
        let settlement = SettlementService::new(store.clone(), config.tax, config.max_retries);
        let engine = MatchingEngine::new(
            store.clone(),
            book.clone(),
            settlement,
            directory.clone(),
            config.cross_scan,
        );
        let sweeper = Arc::new(ExpirationSweeper::new(
            store.clone(),
            book.clone(),
            events.clone(),
            config.sweep_batch,
        ));
        Self {
            config,
            store,
            directory,
            ledger,
            book,
            engine,
            sweeper,
            events,
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// The shared balance primitive for every other game module
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    pub fn sweeper(&self) -> Arc<ExpirationSweeper> {
        Arc::clone(&self.sweeper)
    }

    /// Create an order and, when enabled, cross it against the book
    pub fn place_order(&self, request: NewOrder, now: DateTime<Utc>) -> Result<Placement, MarketError> {
        let order = self.book.create_order(request, now)?;
        self.events.publish(MarketEvent::OrderPlaced { order: order.clone() });

        if !self.config.auto_cross {
            return Ok(Placement {
                order,
                fills: Vec::new(),
            });
        }

        let fills = match self.engine.auto_cross(order.id, now) {
            Ok(fills) => fills,
            Err(err) => {
                // The order itself is placed; it rests with whatever crossed
                warn!(order_id = %order.id, error = %err, "Auto-cross stopped early");
                Vec::new()
            }
        };
        for fill in &fills {
            self.publish_fill(fill);
        }
        let order = self.book.get(order.id)?;
        Ok(Placement {
            order,
            fills: fills.into_iter().map(|fill| fill.transaction).collect(),
        })
    }

    /// Fill up to `quantity` of a visible order from the executor's city
    pub fn execute(
        &self,
        order_id: OrderId,
        quantity: u64,
        executor_id: UserId,
        executor_city_id: CityId,
        now: DateTime<Utc>,
    ) -> Result<Transaction, MarketError> {
        let fill = self
            .engine
            .execute(order_id, quantity, executor_id, executor_city_id, now)?;
        self.publish_fill(&fill);
        Ok(fill.transaction)
    }

    pub fn cancel_order(
        &self,
        order_id: OrderId,
        requester: UserId,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, MarketError> {
        let outcome = self.book.cancel_order(order_id, requester, now)?;
        if let CancelOutcome::Cancelled(order) = &outcome {
            self.events.publish(MarketEvent::OrderCancelled { order: order.clone() });
        }
        Ok(outcome)
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweeper.sweep_at(now)
    }

    pub fn get_order(&self, order_id: OrderId) -> Result<Order, MarketError> {
        self.book.get(order_id)
    }

    pub fn list_active(
        &self,
        resource_type: ResourceType,
        side: Option<Side>,
        limit: Option<usize>,
        offset: usize,
        now: DateTime<Utc>,
    ) -> Vec<Order> {
        self.book.list_active(resource_type, side, limit, offset, now)
    }

    pub fn orders_of(&self, user_id: UserId, status: Option<OrderStatus>, limit: Option<usize>) -> Vec<Order> {
        self.book.orders_of(user_id, status, limit)
    }

    pub fn transactions_of(&self, user_id: UserId, limit: Option<usize>) -> Vec<Transaction> {
        self.book.transactions_of(user_id, limit)
    }

    pub fn stats(&self, resource_type: ResourceType, now: DateTime<Utc>) -> MarketStats {
        market_stats(
            &self.store,
            resource_type,
            self.config.depth,
            self.config.recent_trades,
            now,
        )
    }

    /// A city's balances, visible to its owner only
    pub fn city_balances(&self, user_id: UserId, city_id: CityId) -> Result<Vec<LedgerEntry>, MarketError> {
        if !self.directory.is_owner(user_id, city_id) {
            return Err(MarketError::CityNotOwned { user_id, city_id });
        }
        Ok(self.ledger.balances_of(Holder::City(city_id)))
    }

    /// Full copy of the market's tables
    pub fn image(&self) -> StateImage {
        self.store.image()
    }

    fn publish_fill(&self, fill: &Fill) {
        self.events.publish(MarketEvent::TradeExecuted {
            transaction: fill.transaction.clone(),
        });
        for order in std::iter::once(&fill.order).chain(fill.counter_order.as_ref()) {
            if order.status == OrderStatus::Completed {
                self.events.publish(MarketEvent::OrderFilled { order: order.clone() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryCityDirectory;
    use rust_decimal_macros::dec;
    use types::commit::NullSink;
    use types::ledger::LedgerKey;
    use types::numeric::Price;

    fn market(auto_cross: bool) -> Market {
        let directory = InMemoryCityDirectory::new();
        directory.assign(CityId(10), UserId(1));
        directory.assign(CityId(20), UserId(2));
        let config = MarketConfig {
            auto_cross,
            ..MarketConfig::default()
        };
        let market = Market::new(config, Arc::new(directory), Arc::new(NullSink));
        market
            .ledger()
            .credit(LedgerKey::city(CityId(10), ResourceType::Metal), dec!(100))
            .unwrap();
        market
            .ledger()
            .credit(LedgerKey::city(CityId(20), ResourceType::Gold), dec!(1000))
            .unwrap();
        market
    }

    fn request(user: u64, side: Side, qty: u64, price: u64) -> NewOrder {
        NewOrder {
            owner_id: UserId(user),
            city_id: CityId(user * 10),
            side,
            resource_type: ResourceType::Metal,
            quantity: qty,
            price_per_unit: Price::from_u64(price),
            expires_at: None,
        }
    }

    #[test]
    fn test_placement_crosses_when_enabled() {
        let market = market(true);
        let now = Utc::now();
        market.place_order(request(1, Side::Sell, 10, 5), now).unwrap();
        let placement = market.place_order(request(2, Side::Buy, 4, 5), now).unwrap();

        assert_eq!(placement.fills.len(), 1);
        assert_eq!(placement.order.status, OrderStatus::Completed);
    }

    #[test]
    fn test_placement_rests_when_disabled() {
        let market = market(false);
        let now = Utc::now();
        market.place_order(request(1, Side::Sell, 10, 5), now).unwrap();
        let placement = market.place_order(request(2, Side::Buy, 4, 5), now).unwrap();

        assert!(placement.fills.is_empty());
        assert!(placement.order.is_active());
        assert_eq!(market.list_active(ResourceType::Metal, None, None, 0, now).len(), 2);
    }

    #[tokio::test]
    async fn test_events_follow_commits() {
        let market = market(false);
        let mut rx = market.subscribe();
        let now = Utc::now();
        let order = market.place_order(request(1, Side::Sell, 10, 5), now).unwrap().order;
        market.execute(order.id, 10, UserId(2), CityId(20), now).unwrap();

        let kinds: Vec<_> = (0..3).map(|_| rx.try_recv().unwrap().kind()).collect();
        assert_eq!(kinds, vec!["order_placed", "trade_executed", "order_filled"]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_city_balances_owner_only() {
        let market = market(false);
        let balances = market.city_balances(UserId(1), CityId(10)).unwrap();
        assert_eq!(balances.len(), 1);
        assert!(matches!(
            market.city_balances(UserId(2), CityId(10)),
            Err(MarketError::CityNotOwned { .. })
        ));
    }
}

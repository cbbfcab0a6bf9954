//! Market events
//!
//! Published after a change has committed, for display consumers such as the
//! WebSocket feed. Events are fire-and-forget: publishing never blocks and
//! never fails the operation that produced it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use types::order::Order;
use types::transaction::Transaction;

/// Something that happened on the market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    OrderPlaced { order: Order },
    TradeExecuted { transaction: Transaction },
    /// Remaining quantity reached zero
    OrderFilled { order: Order },
    OrderCancelled { order: Order },
    OrderExpired { order: Order },
}

impl MarketEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MarketEvent::OrderPlaced { .. } => "order_placed",
            MarketEvent::TradeExecuted { .. } => "trade_executed",
            MarketEvent::OrderFilled { .. } => "order_filled",
            MarketEvent::OrderCancelled { .. } => "order_cancelled",
            MarketEvent::OrderExpired { .. } => "order_expired",
        }
    }
}

/// Broadcast channel for market events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MarketEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New subscriber; slow subscribers lag and lose the oldest events
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: MarketEvent) {
        let kind = event.kind();
        // No receivers is not an error
        let receivers = self.tx.send(event).unwrap_or(0);
        trace!(kind, receivers, "Market event published");
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

//! Expiration sweeper
//!
//! Closes active orders whose `expires_at` has passed and releases their
//! reservation exactly as a cancel would. Every transition is a
//! version-checked commit, so any number of sweepers (or a sweeper racing a
//! fill) transition each order at most once; the losers re-read, find a
//! terminal order and move on.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use types::ids::OrderId;
use types::order::Order;

use crate::book::OrderBook;
use crate::events::{EventBus, MarketEvent};
use crate::store::Store;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Orders this pass moved to `expired`
    pub expired: Vec<Order>,
    /// Due orders someone else had already closed
    pub skipped: usize,
    /// Due orders that could not be closed this pass
    pub failed: usize,
    /// The batch limit was hit; more orders may be due
    pub has_more: bool,
}

pub struct ExpirationSweeper {
    store: Arc<Store>,
    book: OrderBook,
    events: EventBus,
    batch: usize,
}

impl ExpirationSweeper {
    pub fn new(store: Arc<Store>, book: OrderBook, events: EventBus, batch: usize) -> Self {
        Self {
            store,
            book,
            events,
            batch: batch.max(1),
        }
    }

    /// Expire everything due at `now`, up to the batch size
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let due: Vec<OrderId> = self.store.with_index(|index| index.expired(now, self.batch));
        let mut report = SweepReport {
            has_more: due.len() == self.batch,
            ..SweepReport::default()
        };

        for order_id in due {
            match self.book.expire_order(order_id, now) {
                Ok(Some(order)) => {
                    self.events.publish(MarketEvent::OrderExpired { order: order.clone() });
                    report.expired.push(order);
                }
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    warn!(%order_id, error = %err, "Failed to expire order");
                    report.failed += 1;
                }
            }
        }

        if !report.expired.is_empty() || report.failed > 0 {
            info!(
                expired = report.expired.len(),
                skipped = report.skipped,
                failed = report.failed,
                "Expiration sweep finished"
            );
        }
        report
    }

    /// Run sweeps on a fixed interval until `shutdown` flips to true
    pub fn spawn(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sweeper = Arc::clone(&self);
                        let report = tokio::task::spawn_blocking(move || sweeper.sweep_at(Utc::now())).await;
                        match report {
                            Ok(report) if report.has_more => ticker.reset_immediately(),
                            Ok(_) => {}
                            Err(err) => warn!(error = %err, "Sweep task panicked"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Expiration sweeper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

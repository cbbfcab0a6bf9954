//! Market statistics
//!
//! Read-only aggregates over the active book and recent transactions of one
//! resource type.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use types::numeric::{Price, CURRENCY_SCALE};
use types::order::Side;
use types::resource::ResourceType;

use crate::book::BookIndex;
use crate::store::Store;

/// Aggregate of one side's active orders
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideSummary {
    pub order_count: usize,
    pub total_quantity: u64,
    /// Mean price per unit across orders
    #[serde(with = "rust_decimal::serde::str_option")]
    pub avg_price: Option<Decimal>,
    /// Highest bid or lowest ask
    pub best_price: Option<Price>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthLevel {
    pub price: Price,
    pub quantity: u64,
    pub orders: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub trades: usize,
    pub volume: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_value: Decimal,
    /// Mean price per unit across trades
    #[serde(with = "rust_decimal::serde::str_option")]
    pub avg_price: Option<Decimal>,
    pub last_price: Option<Price>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStats {
    pub resource_type: ResourceType,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub buy: SideSummary,
    pub sell: SideSummary,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    pub recent: RecentActivity,
}

/// Compute stats for `resource_type` as of `now`
pub fn market_stats(
    store: &Store,
    resource_type: ResourceType,
    depth: usize,
    recent_trades: usize,
    now: DateTime<Utc>,
) -> MarketStats {
    let (buy, sell, bids, asks) = store.with_index(|index| {
        (
            summarize(index, resource_type, Side::Buy, now),
            summarize(index, resource_type, Side::Sell, now),
            depth_levels(index, resource_type, Side::Buy, depth),
            depth_levels(index, resource_type, Side::Sell, depth),
        )
    });
    let recent = store.with_transactions(|all| {
        let mut activity = RecentActivity::default();
        let mut price_sum = Decimal::ZERO;
        for tx in all
            .iter()
            .rev()
            .filter(|tx| tx.resource_type == resource_type)
            .take(recent_trades)
        {
            if activity.last_price.is_none() {
                activity.last_price = Some(tx.price_per_unit);
            }
            activity.trades += 1;
            activity.volume = activity.volume.saturating_add(tx.quantity);
            activity.total_value += tx.total_price;
            price_sum += tx.price_per_unit.as_decimal();
        }
        activity.avg_price = mean(price_sum, activity.trades);
        activity
    });

    MarketStats {
        resource_type,
        best_bid: buy.best_price,
        best_ask: sell.best_price,
        buy,
        sell,
        bids,
        asks,
        recent,
    }
}

fn summarize(index: &BookIndex, resource_type: ResourceType, side: Side, now: DateTime<Utc>) -> SideSummary {
    let mut summary = SideSummary::default();
    let mut price_sum = Decimal::ZERO;
    for (price, entry) in index.entries(resource_type, side, now) {
        if summary.best_price.is_none() {
            summary.best_price = Some(price);
        }
        summary.order_count += 1;
        summary.total_quantity = summary.total_quantity.saturating_add(entry.remaining);
        price_sum += price.as_decimal();
    }
    summary.avg_price = mean(price_sum, summary.order_count);
    summary
}

fn depth_levels(index: &BookIndex, resource_type: ResourceType, side: Side, depth: usize) -> Vec<DepthLevel> {
    let Some(books) = index.book(resource_type) else {
        return Vec::new();
    };
    let snapshot = match side {
        Side::Buy => books.bids.depth_snapshot(depth),
        Side::Sell => books.asks.depth_snapshot(depth),
    };
    snapshot
        .into_iter()
        .map(|(price, quantity, orders)| DepthLevel {
            price,
            quantity,
            orders,
        })
        .collect()
}

fn mean(sum: Decimal, count: usize) -> Option<Decimal> {
    if count == 0 {
        return None;
    }
    Some((sum / Decimal::from(count)).round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

//! Resource Market Service
//!
//! Order matching and atomic settlement for the player-to-player resource
//! market: players offer resources for gold, other players execute against
//! those offers, and every fill moves resource, gold and tax between city
//! ledgers as one all-or-nothing commit.
//!
//! **Key Invariants:**
//! - Balances change only through versioned ledger rows; stale writes are
//!   rejected, never applied
//! - `0 <= remaining_quantity <= quantity`; no order is ever over-filled
//! - Resource and gold are conserved across every fill (tax included)
//! - Price-time priority for listings and auto-cross
//! - No self-trades

pub mod book;
pub mod config;
pub mod directory;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod market;
pub mod matching;
pub mod settlement;
pub mod stats;
pub mod store;
pub mod sweeper;

mod retry;

pub use book::{CancelOutcome, NewOrder, OrderBook};
pub use config::MarketConfig;
pub use directory::{CityDirectory, InMemoryCityDirectory};
pub use engine::MatchingEngine;
pub use events::{EventBus, MarketEvent};
pub use ledger::ResourceLedger;
pub use market::{Market, Placement};
pub use settlement::{Counterparty, Fill, SettlementService};
pub use stats::MarketStats;
pub use sweeper::{ExpirationSweeper, SweepReport};

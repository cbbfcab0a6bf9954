//! Committed change sets
//!
//! Every successful write to the market (an order placed, a fill, a cancel,
//! a plain ledger credit) produces one `CommitRecord` holding the
//! after-image of each row it changed. Records are handed to a `CommitSink`
//! before the change becomes visible, which is how the journal stays ahead
//! of memory.

use crate::ledger::LedgerEntry;
use crate::order::Order;
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// After-images of one committed unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub committed_at: DateTime<Utc>,
    pub orders: Vec<Order>,
    pub balances: Vec<LedgerEntry>,
    pub transactions: Vec<Transaction>,
}

impl CommitRecord {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.balances.is_empty() && self.transactions.is_empty()
    }
}

/// Durable destination for commit records
///
/// `append` runs while the committing rows are locked. An error aborts the
/// commit, so implementations must not report success before the record is
/// safely stored.
pub trait CommitSink: Send + Sync {
    fn append(&self, record: &CommitRecord) -> Result<(), String>;
}

/// Sink that keeps nothing, for tests and ephemeral markets
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl CommitSink for NullSink {
    fn append(&self, _record: &CommitRecord) -> Result<(), String> {
        Ok(())
    }
}

/// Full market state, as rebuilt from a journal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateImage {
    pub orders: Vec<Order>,
    pub balances: Vec<LedgerEntry>,
    pub transactions: Vec<Transaction>,
}

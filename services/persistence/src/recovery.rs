//! Recovery: rebuild market state from the journal
//!
//! Recovery process:
//! 1. Open the journal reader over every file in the directory
//! 2. Decode each entry's commit record in sequence order
//! 3. Fold the after-images into a state image, the highest version of
//!    each row winning
//! 4. Report where the next writer must continue numbering

use crate::journal::JournalError;
use crate::reader::{JournalReader, ReaderError, TornTail};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::info;
use types::commit::{CommitRecord, StateImage};
use types::ids::{OrderId, TransactionId};
use types::ledger::{LedgerEntry, LedgerKey};
use types::order::Order;
use types::transaction::Transaction;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Cannot decode entry {sequence}: {source}")]
    Decode {
        sequence: u64,
        #[source]
        source: JournalError,
    },
}

/// What a recovery pass found
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub replayed: u64,
    /// Highest sequence read, 0 for an empty journal
    pub last_sequence: u64,
    pub torn_tails: Vec<TornTail>,
    pub elapsed_ms: u64,
}

impl RecoveryReport {
    /// Sequence the journal writer should continue from
    pub fn next_sequence(&self) -> u64 {
        self.last_sequence + 1
    }
}

/// Accumulates commit records into a state image
///
/// Rows are keyed by id and the highest version wins, so the result does
/// not depend on the order in which records touching disjoint rows were
/// journaled. Transactions are immutable and kept once, in journal order.
#[derive(Debug, Default)]
pub struct StateBuilder {
    orders: BTreeMap<OrderId, Order>,
    balances: BTreeMap<LedgerKey, LedgerEntry>,
    transactions: Vec<Transaction>,
    seen_transactions: HashSet<TransactionId>,
}

impl StateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, record: CommitRecord) {
        for order in record.orders {
            match self.orders.get(&order.id) {
                Some(current) if current.version >= order.version => {}
                _ => {
                    self.orders.insert(order.id, order);
                }
            }
        }
        for entry in record.balances {
            match self.balances.get(&entry.key) {
                Some(current) if current.version >= entry.version => {}
                _ => {
                    self.balances.insert(entry.key, entry);
                }
            }
        }
        for tx in record.transactions {
            if self.seen_transactions.insert(tx.id) {
                self.transactions.push(tx);
            }
        }
    }

    pub fn finish(self) -> StateImage {
        StateImage {
            orders: self.orders.into_values().collect(),
            balances: self.balances.into_values().collect(),
            transactions: self.transactions,
        }
    }
}

/// Replay the journal in `dir` into a state image
pub fn recover(dir: &Path) -> Result<(StateImage, RecoveryReport), RecoveryError> {
    let started = Instant::now();
    let mut reader = JournalReader::open(dir)?;
    let mut builder = StateBuilder::new();
    let mut report = RecoveryReport::default();

    while let Some(entry) = reader.next_entry()? {
        let record = entry.record().map_err(|source| RecoveryError::Decode {
            sequence: entry.sequence,
            source,
        })?;
        builder.apply(record);
        report.replayed += 1;
        report.last_sequence = entry.sequence;
    }

    report.torn_tails = reader.torn_tails().to_vec();
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    let image = builder.finish();
    info!(
        replayed = report.replayed,
        last_sequence = report.last_sequence,
        orders = image.orders.len(),
        balances = image.balances.len(),
        transactions = image.transactions.len(),
        torn_tails = report.torn_tails.len(),
        elapsed_ms = report.elapsed_ms,
        "Journal recovery complete"
    );
    Ok((image, report))
}

//! Versioned row store and changeset commit
//!
//! Orders and ledger entries live in row tables, one `Mutex` per row. A unit
//! of work reads rows into a [`Changeset`] (remembering each row's version),
//! mutates its private copies, and hands the changeset to [`Store::commit`].
//!
//! Commit locks the touched rows in a fixed global order (orders by id, then
//! ledger rows by key), checks every stored version against the version that
//! was read, writes the after-images to the [`CommitSink`], and only then
//! applies them with `version + 1`. Any mismatch aborts the whole commit with
//! nothing applied. Row locks are held only for that validate-and-apply
//! window, and two commits touching disjoint rows never share a lock.
//!
//! Lock order: a row lock may be taken while holding other row locks (in the
//! global order) and map-shard or index locks may be taken while holding row
//! locks, never the other way round. Row handles are cloned out of the maps
//! before any row lock is requested.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};
use types::commit::{CommitRecord, CommitSink, StateImage};
use types::errors::{LedgerError, MarketError};
use types::ids::OrderId;
use types::ledger::{Holder, LedgerEntry, LedgerKey};
use types::order::Order;
use types::transaction::Transaction;

use crate::book::index::BookIndex;

type Row<T> = Arc<Mutex<T>>;

/// Why a commit did not happen
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CommitError {
    /// A row changed since it was read; the unit of work may be retried
    Conflict { expected: u64, found: u64 },
    /// The unit of work cannot succeed as staged
    Fatal(MarketError),
}

impl From<MarketError> for CommitError {
    fn from(err: MarketError) -> Self {
        CommitError::Fatal(err)
    }
}

impl From<LedgerError> for CommitError {
    fn from(err: LedgerError) -> Self {
        CommitError::Fatal(err.into())
    }
}

/// A row copied into a changeset
#[derive(Debug, Clone)]
struct Staged<T> {
    read_version: u64,
    row: T,
    dirty: bool,
}

impl<T> Staged<T> {
    fn new(read_version: u64, row: T) -> Self {
        Self {
            read_version,
            row,
            dirty: false,
        }
    }
}

/// Staged reads and writes of one optimistic unit of work
///
/// Rows are snapshotted the first time they are touched; later accesses
/// see the changeset's own copy. Rows only read are still version-checked
/// at commit but keep their version.
pub struct Changeset<'a> {
    store: &'a Store,
    orders: BTreeMap<OrderId, Staged<Order>>,
    ledger: BTreeMap<LedgerKey, Staged<LedgerEntry>>,
    new_orders: Vec<Order>,
    transactions: Vec<Transaction>,
}

impl<'a> Changeset<'a> {
    fn stage_order(&mut self, id: OrderId) -> Result<&mut Staged<Order>, MarketError> {
        match self.orders.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(slot) => {
                let row = self
                    .store
                    .order(&id)
                    .ok_or(MarketError::OrderNotFound { order_id: id })?;
                Ok(slot.insert(Staged::new(row.version, row)))
            }
        }
    }

    fn stage_ledger(&mut self, key: LedgerKey) -> &mut Staged<LedgerEntry> {
        let store = self.store;
        self.ledger.entry(key).or_insert_with(|| {
            let row = store.balance(&key);
            Staged::new(row.version, row)
        })
    }

    /// Read an order without intending to write it
    pub fn order(&mut self, id: OrderId) -> Result<&Order, MarketError> {
        Ok(&self.stage_order(id)?.row)
    }

    /// Read an order for writing
    pub fn order_mut(&mut self, id: OrderId) -> Result<&mut Order, MarketError> {
        let staged = self.stage_order(id)?;
        staged.dirty = true;
        Ok(&mut staged.row)
    }

    /// Read a ledger entry without intending to write it
    pub fn ledger(&mut self, key: LedgerKey) -> &LedgerEntry {
        &self.stage_ledger(key).row
    }

    /// Read a ledger entry for writing; absent rows start empty at version 0
    pub fn ledger_mut(&mut self, key: LedgerKey) -> &mut LedgerEntry {
        let staged = self.stage_ledger(key);
        staged.dirty = true;
        &mut staged.row
    }

    /// Stage an existing ledger row image as the expected state
    pub(crate) fn expect_ledger(&mut self, expected: &LedgerEntry) -> &mut LedgerEntry {
        let staged = self
            .ledger
            .entry(expected.key)
            .or_insert_with(|| Staged::new(expected.version, expected.clone()));
        staged.dirty = true;
        &mut staged.row
    }

    /// Add a brand new order
    pub fn insert_order(&mut self, order: Order) {
        self.new_orders.push(order);
    }

    /// Add a transaction row
    pub fn push_transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    pub fn is_empty(&self) -> bool {
        self.new_orders.is_empty()
            && self.transactions.is_empty()
            && self.orders.values().all(|s| !s.dirty)
            && self.ledger.values().all(|s| !s.dirty)
    }
}

/// The market's tables
pub struct Store {
    orders: DashMap<OrderId, Row<Order>>,
    ledger: DashMap<LedgerKey, Row<LedgerEntry>>,
    transactions: RwLock<Vec<Transaction>>,
    index: RwLock<BookIndex>,
    sink: Arc<dyn CommitSink>,
}

impl Store {
    pub fn new(sink: Arc<dyn CommitSink>) -> Self {
        Self {
            orders: DashMap::new(),
            ledger: DashMap::new(),
            transactions: RwLock::new(Vec::new()),
            index: RwLock::new(BookIndex::new()),
            sink,
        }
    }

    /// Rebuild the tables from a recovered state image
    ///
    /// Nothing is written to the sink: the image came from it.
    pub fn restore(image: StateImage, sink: Arc<dyn CommitSink>) -> Self {
        let store = Self::new(sink);
        {
            let mut index = store.index.write();
            for order in image.orders {
                index.reconcile(&order);
                store.orders.insert(order.id, Arc::new(Mutex::new(order)));
            }
        }
        for entry in image.balances {
            store.ledger.insert(entry.key, Arc::new(Mutex::new(entry)));
        }
        let mut transactions = image.transactions;
        transactions.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        *store.transactions.write() = transactions;
        store
    }

    /// Start a unit of work
    pub fn changeset(&self) -> Changeset<'_> {
        Changeset {
            store: self,
            orders: BTreeMap::new(),
            ledger: BTreeMap::new(),
            new_orders: Vec::new(),
            transactions: Vec::new(),
        }
    }

    /// Snapshot of one order
    pub fn order(&self, id: &OrderId) -> Option<Order> {
        let handle = self.orders.get(id).map(|row| Arc::clone(row.value()))?;
        let order = handle.lock().clone();
        Some(order)
    }

    /// Snapshot of one ledger entry; absent rows read as empty
    pub fn balance(&self, key: &LedgerKey) -> LedgerEntry {
        let handle = self.ledger.get(key).map(|row| Arc::clone(row.value()));
        match handle {
            Some(row) => row.lock().clone(),
            None => LedgerEntry::empty(*key),
        }
    }

    /// Snapshots of every order matching `filter`
    pub fn scan_orders(&self, filter: impl Fn(&Order) -> bool) -> Vec<Order> {
        let handles: Vec<Row<Order>> = self.orders.iter().map(|row| Arc::clone(row.value())).collect();
        handles
            .into_iter()
            .filter_map(|row| {
                let order = row.lock();
                filter(&order).then(|| order.clone())
            })
            .collect()
    }

    /// Snapshots of every ledger entry held by `holder`
    pub fn balances_of(&self, holder: Holder) -> Vec<LedgerEntry> {
        let handles: Vec<Row<LedgerEntry>> = self
            .ledger
            .iter()
            .filter(|row| row.key().holder == holder)
            .map(|row| Arc::clone(row.value()))
            .collect();
        let mut entries: Vec<LedgerEntry> = handles.into_iter().map(|row| row.lock().clone()).collect();
        entries.sort_by_key(|entry| entry.key);
        entries
    }

    /// Snapshots of every ledger entry
    pub fn all_balances(&self) -> Vec<LedgerEntry> {
        let handles: Vec<Row<LedgerEntry>> = self.ledger.iter().map(|row| Arc::clone(row.value())).collect();
        handles.into_iter().map(|row| row.lock().clone()).collect()
    }

    /// Read access to the transaction history, oldest first
    pub fn with_transactions<R>(&self, f: impl FnOnce(&[Transaction]) -> R) -> R {
        f(&self.transactions.read())
    }

    /// Read access to the active-order index
    pub fn with_index<R>(&self, f: impl FnOnce(&BookIndex) -> R) -> R {
        f(&self.index.read())
    }

    /// Full copy of the tables
    pub fn image(&self) -> StateImage {
        let mut orders = self.scan_orders(|_| true);
        orders.sort_by_key(|order| order.id);
        let mut balances = self.all_balances();
        // Rows a commit only locked were never written
        balances.retain(|entry| entry.version > 0);
        balances.sort_by_key(|entry| entry.key);
        StateImage {
            orders,
            balances,
            transactions: self.transactions.read().clone(),
        }
    }

    /// Validate, journal and apply a changeset atomically
    pub(crate) fn commit(&self, cs: Changeset<'_>, now: DateTime<Utc>) -> Result<CommitRecord, CommitError> {
        let Changeset {
            orders,
            ledger,
            new_orders,
            transactions,
            ..
        } = cs;

        // Clone handles out of the maps before taking any row lock
        let order_rows: Vec<(Row<Order>, Staged<Order>)> = orders
            .into_iter()
            .map(|(id, staged)| {
                self.orders
                    .get(&id)
                    .map(|row| (Arc::clone(row.value()), staged))
                    .ok_or(CommitError::Fatal(MarketError::OrderNotFound { order_id: id }))
            })
            .collect::<Result<_, _>>()?;
        let ledger_rows: Vec<(Row<LedgerEntry>, Staged<LedgerEntry>)> = ledger
            .into_iter()
            .map(|(key, staged)| {
                let row = self
                    .ledger
                    .entry(key)
                    .or_insert_with(|| Arc::new(Mutex::new(LedgerEntry::empty(key))))
                    .value()
                    .clone();
                (row, staged)
            })
            .collect();

        // BTreeMap iteration already yields the global lock order
        let mut order_guards: Vec<_> = order_rows.iter().map(|(row, _)| row.lock()).collect();
        let mut ledger_guards: Vec<_> = ledger_rows.iter().map(|(row, _)| row.lock()).collect();

        for (guard, (_, staged)) in order_guards.iter().zip(&order_rows) {
            if guard.version != staged.read_version {
                debug!(order_id = %guard.id, expected = staged.read_version, found = guard.version, "Order row changed since read");
                return Err(CommitError::Conflict {
                    expected: staged.read_version,
                    found: guard.version,
                });
            }
        }
        for (guard, (_, staged)) in ledger_guards.iter().zip(&ledger_rows) {
            if guard.version != staged.read_version {
                debug!(key = %guard.key, expected = staged.read_version, found = guard.version, "Ledger row changed since read");
                return Err(CommitError::Conflict {
                    expected: staged.read_version,
                    found: guard.version,
                });
            }
        }

        let mut record = CommitRecord {
            committed_at: now,
            orders: Vec::new(),
            balances: Vec::new(),
            transactions,
        };
        for (_, staged) in order_rows.iter().filter(|(_, s)| s.dirty) {
            let mut image = staged.row.clone();
            image.version = staged.read_version + 1;
            record.orders.push(image);
        }
        for order in new_orders {
            let mut image = order;
            image.version = 1;
            record.orders.push(image);
        }
        for (_, staged) in ledger_rows.iter().filter(|(_, s)| s.dirty) {
            let mut image = staged.row.clone();
            image.version = staged.read_version + 1;
            record.balances.push(image);
        }

        if record.is_empty() {
            return Ok(record);
        }

        if let Err(reason) = self.sink.append(&record) {
            error!(%reason, "Commit record could not be journaled");
            return Err(CommitError::Fatal(MarketError::Journal(reason)));
        }

        // Journaled: from here on nothing may fail
        let mut images = record.orders.iter();
        for guard in order_guards.iter_mut().zip(&order_rows).filter(|(_, (_, s))| s.dirty).map(|(g, _)| g) {
            if let Some(image) = images.next() {
                **guard = image.clone();
            }
        }
        for image in images {
            self.orders.insert(image.id, Arc::new(Mutex::new(image.clone())));
        }
        let mut balance_images = record.balances.iter();
        for guard in ledger_guards.iter_mut().zip(&ledger_rows).filter(|(_, (_, s))| s.dirty).map(|(g, _)| g) {
            if let Some(image) = balance_images.next() {
                **guard = image.clone();
            }
        }

        {
            let mut index = self.index.write();
            for order in &record.orders {
                index.reconcile(order);
            }
        }
        if !record.transactions.is_empty() {
            self.transactions.write().extend(record.transactions.iter().cloned());
        }

        drop(ledger_guards);
        drop(order_guards);
        Ok(record)
    }
}

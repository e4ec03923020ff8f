//! Driver collaborator interfaces.
//!
//! A driver owns the physical connection. For every frame entered through a
//! transacter it hands out a [`Transaction`] record, and it commits or rolls
//! back the physical transaction when the root frame ends.

use std::collections::{BTreeSet, HashMap};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::Result;
use crate::owner::OwnerId;
use crate::transaction::Transaction;

/// Blocking driver used by [`Transacter`](crate::Transacter).
pub trait SqlDriver: Send + Sync {
    /// Returns a new record nested in the caller's active transaction, or
    /// begins a physical transaction and returns a root record when none is
    /// active. The returned record becomes the caller's current transaction.
    fn new_transaction(&self) -> Result<Transaction>;

    /// The active transaction of the calling thread or task.
    fn current_transaction(&self) -> Option<Transaction>;

    /// Called exactly once per record, with `successful` false for a frame
    /// whose body panicked. Root records commit when `successful` and roll
    /// back otherwise; every record restores the caller's current transaction
    /// to its enclosing one.
    fn end_transaction(&self, transaction: &Transaction, successful: bool) -> Result<()>;

    /// Fans out an invalidation of `table_names` to query-result listeners.
    fn notify_listeners(&self, table_names: &BTreeSet<String>);
}

/// Non-blocking driver used by [`AsyncTransacter`](crate::AsyncTransacter).
///
/// Same contract as [`SqlDriver`]; beginning and ending the physical
/// transaction complete asynchronously.
pub trait AsyncSqlDriver: Send + Sync {
    /// Returns a new record nested in the calling task's active transaction,
    /// or begins a physical transaction and returns a root record.
    fn new_transaction(&self) -> BoxFuture<'_, Result<Transaction>>;

    /// The active transaction of the calling task.
    fn current_transaction(&self) -> Option<Transaction>;

    /// Called once per record that finishes normally. Root records commit when
    /// `successful` and roll back otherwise; every record restores the task's
    /// current transaction to its enclosing one.
    fn end_transaction<'a>(
        &'a self,
        transaction: &'a Transaction,
        successful: bool,
    ) -> BoxFuture<'a, Result<()>>;

    /// Releases a record whose frame was dropped before it finished, for
    /// example when the transaction future hit a timeout.
    ///
    /// Runs from a destructor, so it must not block. Root records give up
    /// their physical transaction without committing it; every record
    /// restores the current transaction of its owner to the enclosing one.
    fn abandon_transaction(&self, transaction: &Transaction);

    /// Fans out an invalidation of `table_names` to query-result listeners.
    fn notify_listeners(&self, table_names: &BTreeSet<String>);
}

/// Per-owner "current transaction" slots for driver implementations.
///
/// Keyed by [`OwnerId`], so concurrent threads or tasks sharing one driver
/// never observe each other's transactions.
#[derive(Debug, Default)]
pub struct TransactionSlots {
    slots: Mutex<HashMap<OwnerId, Transaction>>,
}

impl TransactionSlots {
    /// Creates an empty slot map.
    pub fn new() -> Self {
        Self::default()
    }

    /// The transaction currently active for the caller.
    pub fn current(&self) -> Option<Transaction> {
        self.slots.lock().get(&OwnerId::current()).cloned()
    }

    /// Creates a record nested in `enclosing` and makes it current for the caller.
    pub fn enter(&self, enclosing: Option<Transaction>) -> Transaction {
        let transaction = Transaction::new(enclosing);
        self.slots
            .lock()
            .insert(transaction.owner(), transaction.clone());
        transaction
    }

    /// Restores the owner's current transaction to the one `transaction` nests in.
    pub fn exit(&self, transaction: &Transaction) {
        let mut slots = self.slots.lock();
        match transaction.enclosing() {
            Some(enclosing) => {
                slots.insert(transaction.owner(), enclosing.clone());
            }
            None => {
                slots.remove(&transaction.owner());
            }
        }
    }

    /// Number of owners with an active transaction.
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

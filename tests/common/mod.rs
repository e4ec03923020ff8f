#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use sqlx_transacter::{AsyncSqlDriver, Error, Result, SqlDriver, Transaction, TransactionSlots};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin,
    Commit,
    Rollback,
    Notify(Vec<String>),
}

/// In-process driver that records physical begin/commit/rollback calls and
/// listener notifications.
#[derive(Default)]
pub struct RecordingDriver {
    slots: TransactionSlots,
    events: Mutex<Vec<Event>>,
    fail_commit: AtomicBool,
    fail_nested_end: AtomicBool,
}

impl RecordingDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn notifications(&self) -> Vec<Vec<String>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Notify(tables) => Some(tables),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == wanted).count()
    }

    pub fn active(&self) -> usize {
        self.slots.active()
    }

    pub fn fail_next_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_nested_end(&self) {
        self.fail_nested_end.store(true, Ordering::SeqCst);
    }

    fn begin(&self) -> Transaction {
        let enclosing = self.slots.current();
        if enclosing.is_none() {
            self.events.lock().push(Event::Begin);
        }
        self.slots.enter(enclosing)
    }

    fn end(&self, transaction: &Transaction, successful: bool) -> Result<()> {
        self.slots.exit(transaction);
        if !transaction.is_root() {
            if self.fail_nested_end.swap(false, Ordering::SeqCst) {
                return Err(Error::other("release failed"));
            }
            return Ok(());
        }
        if successful && self.fail_commit.swap(false, Ordering::SeqCst) {
            self.events.lock().push(Event::Rollback);
            return Err(Error::other("commit failed"));
        }
        self.events.lock().push(if successful {
            Event::Commit
        } else {
            Event::Rollback
        });
        Ok(())
    }

    fn notify(&self, table_names: &BTreeSet<String>) {
        self.events
            .lock()
            .push(Event::Notify(table_names.iter().cloned().collect()));
    }
}

impl SqlDriver for RecordingDriver {
    fn new_transaction(&self) -> Result<Transaction> {
        Ok(self.begin())
    }

    fn current_transaction(&self) -> Option<Transaction> {
        self.slots.current()
    }

    fn end_transaction(&self, transaction: &Transaction, successful: bool) -> Result<()> {
        self.end(transaction, successful)
    }

    fn notify_listeners(&self, table_names: &BTreeSet<String>) {
        self.notify(table_names);
    }
}

impl AsyncSqlDriver for RecordingDriver {
    fn new_transaction(&self) -> BoxFuture<'_, Result<Transaction>> {
        async move {
            tokio::task::yield_now().await;
            Ok(self.begin())
        }
        .boxed()
    }

    fn current_transaction(&self) -> Option<Transaction> {
        self.slots.current()
    }

    fn end_transaction<'a>(
        &'a self,
        transaction: &'a Transaction,
        successful: bool,
    ) -> BoxFuture<'a, Result<()>> {
        async move { self.end(transaction, successful) }.boxed()
    }

    fn abandon_transaction(&self, transaction: &Transaction) {
        self.slots.exit(transaction);
        if transaction.is_root() {
            self.events.lock().push(Event::Rollback);
        }
    }

    fn notify_listeners(&self, table_names: &BTreeSet<String>) {
        self.notify(table_names);
    }
}

/// Shared, ordered log of hook invocations.
#[derive(Clone, Default)]
pub struct HookLog(Arc<Mutex<Vec<String>>>);

impl HookLog {
    pub fn record(&self, entry: &str) -> impl FnOnce() -> std::result::Result<(), sqlx_transacter::BoxError> + Send + 'static {
        let log = self.0.clone();
        let entry = entry.to_string();
        move || {
            log.lock().push(entry);
            Ok(())
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

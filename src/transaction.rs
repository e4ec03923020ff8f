//! Per-frame transaction record.
//!
//! A [`Transaction`] is created by a driver for every frame entered through a
//! transacter, linked to the frame it nests in. The record collects hooks,
//! invalidated tables and the success flags; when its frame finishes it either
//! merges all of that into the enclosing record or, at the root, fires the
//! hooks and notifies listeners.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::{BoxError, Error, Result};
use crate::owner::OwnerId;

pub(crate) type Hook = Box<dyn FnOnce() -> std::result::Result<(), BoxError> + Send>;

/// Shared handle to one logical transaction frame.
///
/// Cloning the handle does not create a new frame; drivers keep a clone in
/// their per-owner slot while the frame is active.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

struct Inner {
    owner: OwnerId,
    enclosing: Option<Transaction>,
    state: Mutex<State>,
}

struct State {
    successful: bool,
    children_successful: bool,
    ended: bool,
    registered_queries: HashSet<i32>,
    pending_tables: BTreeSet<String>,
    post_commit_hooks: Vec<Hook>,
    post_rollback_hooks: Vec<Hook>,
}

impl Transaction {
    /// Creates a record owned by the calling thread or task.
    ///
    /// Drivers call this from `new_transaction`, passing the transaction that
    /// is currently active for the caller (if any) as `enclosing`.
    pub fn new(enclosing: Option<Transaction>) -> Self {
        Self {
            inner: Arc::new(Inner {
                owner: OwnerId::current(),
                enclosing,
                state: Mutex::new(State {
                    successful: false,
                    children_successful: true,
                    ended: false,
                    registered_queries: HashSet::new(),
                    pending_tables: BTreeSet::new(),
                    post_commit_hooks: Vec::new(),
                    post_rollback_hooks: Vec::new(),
                }),
            }),
        }
    }

    /// The transaction this one is nested in, or `None` for a root frame.
    pub fn enclosing(&self) -> Option<&Transaction> {
        self.inner.enclosing.as_ref()
    }

    /// Returns `true` if this record backs a root frame.
    pub fn is_root(&self) -> bool {
        self.inner.enclosing.is_none()
    }

    /// The thread or task this transaction is confined to.
    pub fn owner(&self) -> OwnerId {
        self.inner.owner
    }

    /// Returns `true` if both handles refer to the same frame.
    pub fn same(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn check_thread_confinement(&self) {
        let current = OwnerId::current();
        if current != self.inner.owner {
            panic!(
                "Transaction objects (`TransactionWithReturn` and `TransactionWithoutReturn`) must be used \
                 only within the transaction scope that created them (owner {:?}, called from {:?})",
                self.inner.owner, current
            );
        }
    }

    pub(crate) fn add_post_commit_hook(&self, hook: Hook) {
        self.check_thread_confinement();
        self.inner.state.lock().post_commit_hooks.push(hook);
    }

    pub(crate) fn add_post_rollback_hook(&self, hook: Hook) {
        self.check_thread_confinement();
        self.inner.state.lock().post_rollback_hooks.push(hook);
    }

    pub(crate) fn mark_successful(&self) {
        self.inner.state.lock().successful = true;
    }

    /// Seals the record and returns whether it should commit.
    ///
    /// Panics if called twice or off the owning thread.
    pub(crate) fn end(&self) -> bool {
        self.check_thread_confinement();
        let mut state = self.inner.state.lock();
        assert!(!state.ended, "transaction ended twice");
        state.ended = true;
        state.successful && state.children_successful
    }

    /// Seals the record as failed without the owner check. Used for frames
    /// that never reached their normal end; returns `false` if the record had
    /// already ended.
    pub(crate) fn abort(&self) -> bool {
        let mut state = self.inner.state.lock();
        state.successful = false;
        !mem::replace(&mut state.ended, true)
    }

    /// Settles an aborted record: nested records merge into their parent as
    /// failed, root records run their rollback hooks.
    pub(crate) fn settle_aborted(&self) {
        match self.enclosing() {
            Some(enclosing) => self.merge_into(enclosing),
            // hook failures are logged by settle_root
            None => {
                let _ = self.settle_root::<(), _>(Ok(()), |_| {});
            }
        }
    }

    /// Records `identifier` and feeds its tables into the pending set, once per
    /// distinct identifier.
    pub(crate) fn register_query<P>(&self, identifier: i32, table_provider: P)
    where
        P: FnOnce(&mut dyn FnMut(&str)),
    {
        if !self.inner.state.lock().registered_queries.insert(identifier) {
            return;
        }
        let mut tables = Vec::new();
        table_provider(&mut |table| tables.push(table.to_owned()));
        self.inner.state.lock().pending_tables.extend(tables);
    }

    /// Completes the bookkeeping of a frame whose record has already been
    /// ended against the driver.
    ///
    /// Nested records merge into their enclosing record and pass `outcome`
    /// through. Root records run hooks and notify listeners, then convert a
    /// rollback signal into the value it carries.
    pub(crate) fn settle<R, N>(&self, outcome: Result<R>, notify: N) -> Result<R>
    where
        R: 'static,
        N: FnOnce(&BTreeSet<String>),
    {
        match self.enclosing() {
            Some(enclosing) => {
                self.merge_into(enclosing);
                outcome
            }
            None => self.settle_root(outcome, notify),
        }
    }

    fn merge_into(&self, enclosing: &Transaction) {
        let mut child = mem::replace(&mut *self.inner.state.lock(), State::merged());
        let mut parent = enclosing.inner.state.lock();
        parent.children_successful &= child.successful && child.children_successful;
        parent.post_commit_hooks.append(&mut child.post_commit_hooks);
        parent.post_rollback_hooks.append(&mut child.post_rollback_hooks);
        parent.registered_queries.extend(child.registered_queries);
        parent.pending_tables.append(&mut child.pending_tables);
    }

    fn settle_root<R, N>(&self, outcome: Result<R>, notify: N) -> Result<R>
    where
        R: 'static,
        N: FnOnce(&BTreeSet<String>),
    {
        let (committed, pending_tables, commit_hooks, rollback_hooks) = {
            let mut state = self.inner.state.lock();
            state.registered_queries.clear();
            (
                state.successful && state.children_successful,
                mem::take(&mut state.pending_tables),
                mem::take(&mut state.post_commit_hooks),
                mem::take(&mut state.post_rollback_hooks),
            )
        };

        if committed {
            if !pending_tables.is_empty() {
                trace!(target: "sqlx_transacter::txn", tables = ?pending_tables, "Notifying listeners");
                notify(&pending_tables);
            }
            for hook in commit_hooks {
                hook().map_err(|e| {
                    warn!(target: "sqlx_transacter::txn", error = %e, "Commit hook failed");
                    Error::Hook(e)
                })?;
            }
        } else {
            for hook in rollback_hooks {
                if let Err(rollback) = hook() {
                    warn!(target: "sqlx_transacter::txn", error = %rollback, "Rollback hook failed");
                    return Err(match outcome {
                        Err(original) => Error::RollbackFailed {
                            original: Box::new(original),
                            rollback,
                        },
                        Ok(_) => Error::Hook(rollback),
                    });
                }
            }
        }

        match outcome {
            Err(Error::RolledBack(signal)) => signal.into_value::<R>().map_err(Error::RolledBack),
            other => other,
        }
    }
}

type Release<'d> = Box<dyn FnOnce(&Transaction) + Send + Sync + 'd>;

/// Rolls a frame back if it is dropped before [`disarm`](Self::disarm).
///
/// Transacters hold one per frame between begin and the driver's
/// `end_transaction`, so a panicking body or a dropped transaction future
/// still releases the driver slot and settles the record.
pub(crate) struct FrameGuard<'d> {
    transaction: Transaction,
    release: Option<Release<'d>>,
}

impl<'d> FrameGuard<'d> {
    pub(crate) fn new<F>(transaction: Transaction, release: F) -> Self
    where
        F: FnOnce(&Transaction) + Send + Sync + 'd,
    {
        Self {
            transaction,
            release: Some(Box::new(release)),
        }
    }

    pub(crate) fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub(crate) fn disarm(mut self) -> Transaction {
        self.release = None;
        self.transaction.clone()
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let Some(release) = self.release.take() else {
            return;
        };
        warn!(
            target: "sqlx_transacter::txn",
            root = self.transaction.is_root(),
            "Transaction dropped before it finished, rolling back"
        );
        self.transaction.abort();
        release(&self.transaction);
        self.transaction.settle_aborted();
    }
}

impl State {
    /// What is left of a child record after its contents moved to the parent.
    fn merged() -> Self {
        State {
            successful: false,
            children_successful: true,
            ended: true,
            registered_queries: HashSet::new(),
            pending_tables: BTreeSet::new(),
            post_commit_hooks: Vec::new(),
            post_rollback_hooks: Vec::new(),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Transaction")
            .field("owner", &self.inner.owner)
            .field("root", &self.is_root())
            .field("successful", &state.successful)
            .field("children_successful", &state.children_successful)
            .field("pending_tables", &state.pending_tables)
            .finish_non_exhaustive()
    }
}

/// Batches or immediately delivers the tables touched by query `identifier`.
pub(crate) fn notify_queries<P, N>(
    current: Option<Transaction>,
    identifier: i32,
    table_provider: P,
    notify: N,
) where
    P: FnOnce(&mut dyn FnMut(&str)),
    N: FnOnce(&BTreeSet<String>),
{
    match current {
        Some(transaction) => transaction.register_query(identifier, table_provider),
        None => {
            let mut tables = BTreeSet::new();
            table_provider(&mut |table| {
                tables.insert(table.to_owned());
            });
            if !tables.is_empty() {
                notify(&tables);
            }
        }
    }
}

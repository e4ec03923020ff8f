//! Handles passed to transaction bodies.
//!
//! A body never sees the [`Transaction`] record itself. It receives one of the
//! wrappers below, which can register hooks, roll back, or open a nested
//! frame on the transacter that created it.
//!
//! All wrapper methods must be called from the thread or task that opened the
//! frame. Calling them from anywhere else panics.

use std::marker::PhantomData;

use futures::future::BoxFuture;

use crate::async_transacter::AsyncTransacter;
use crate::error::{BoxError, Error, Result, RollbackSignal};
use crate::transacter::Transacter;
use crate::transaction::{Hook, Transaction};

/// Hook registration shared by every transaction wrapper.
pub trait TransactionCallbacks {
    /// Queues `function` to run after the root transaction commits.
    fn after_commit<F>(&self, function: F)
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static;

    /// Queues `function` to run after the root transaction rolls back.
    fn after_rollback<F>(&self, function: F)
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static;
}

fn rollback_with<T, R>(transaction: &Transaction, value: R) -> Result<T>
where
    R: Send + Sync + 'static,
{
    transaction.check_thread_confinement();
    Err(Error::RolledBack(RollbackSignal::new(value)))
}

macro_rules! impl_callbacks {
    ($($wrapper:ident<$($param:tt),*>),* $(,)?) => {
        $(
            impl<$($param),*> TransactionCallbacks for $wrapper<$($param),*> {
                fn after_commit<F>(&self, function: F)
                where
                    F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
                {
                    let hook: Hook = Box::new(function);
                    self.transaction.add_post_commit_hook(hook);
                }

                fn after_rollback<F>(&self, function: F)
                where
                    F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
                {
                    let hook: Hook = Box::new(function);
                    self.transaction.add_post_rollback_hook(hook);
                }
            }
        )*
    };
}

impl_callbacks!(
    TransactionWithoutReturn<'a>,
    TransactionWithReturn<'a, R>,
    AsyncTransactionWithoutReturn<'a>,
    AsyncTransactionWithReturn<'a, R>,
);

/// Handle for a blocking transaction body that returns nothing.
pub struct TransactionWithoutReturn<'a> {
    transacter: &'a Transacter,
    transaction: Transaction,
}

impl<'a> TransactionWithoutReturn<'a> {
    pub(crate) fn new(transacter: &'a Transacter, transaction: Transaction) -> Self {
        Self {
            transacter,
            transaction,
        }
    }

    /// Rolls back the whole transaction tree.
    ///
    /// The returned error must be propagated out of the body; the root frame
    /// turns it back into `Ok(())`.
    pub fn rollback<T>(&self) -> Result<T> {
        rollback_with(&self.transaction, ())
    }

    /// Runs `body` in a frame nested in this one.
    pub fn transaction<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce(&TransactionWithoutReturn<'_>) -> Result<()>,
    {
        self.transacter.transaction(false, body)
    }

    /// Runs `body` in a nested frame and returns its result.
    pub fn transaction_with_result<R, F>(&self, body: F) -> Result<R>
    where
        R: 'static,
        F: FnOnce(&TransactionWithReturn<'_, R>) -> Result<R>,
    {
        self.transacter.transaction_with_result(false, body)
    }
}

/// Handle for a blocking transaction body that returns an `R`.
pub struct TransactionWithReturn<'a, R> {
    transacter: &'a Transacter,
    transaction: Transaction,
    _result: PhantomData<fn() -> R>,
}

impl<'a, R> TransactionWithReturn<'a, R> {
    pub(crate) fn new(transacter: &'a Transacter, transaction: Transaction) -> Self {
        Self {
            transacter,
            transaction,
            _result: PhantomData,
        }
    }

    /// Rolls back the whole transaction tree; the root frame returns `value`.
    pub fn rollback<T>(&self, value: R) -> Result<T>
    where
        R: Send + Sync + 'static,
    {
        rollback_with(&self.transaction, value)
    }

    /// Runs `body` in a frame nested in this one.
    ///
    /// # Errors
    ///
    /// Returns the nested body's error, including the rollback signal, which
    /// should be propagated with `?`.
    pub fn transaction<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce(&TransactionWithoutReturn<'_>) -> Result<()>,
    {
        self.transacter.transaction(false, body)
    }

    /// Runs `body` in a nested frame that returns an `S`.
    pub fn transaction_with_result<S, F>(&self, body: F) -> Result<S>
    where
        S: 'static,
        F: FnOnce(&TransactionWithReturn<'_, S>) -> Result<S>,
    {
        self.transacter.transaction_with_result(false, body)
    }
}

/// Handle for an async transaction body that returns nothing.
pub struct AsyncTransactionWithoutReturn<'a> {
    transacter: &'a AsyncTransacter,
    transaction: Transaction,
}

impl<'a> AsyncTransactionWithoutReturn<'a> {
    pub(crate) fn new(transacter: &'a AsyncTransacter, transaction: Transaction) -> Self {
        Self {
            transacter,
            transaction,
        }
    }

    /// Rolls back the whole transaction tree.
    ///
    /// # Panics
    ///
    /// Panics when called from a task other than the one running the frame.
    pub fn rollback<T>(&self) -> Result<T> {
        rollback_with(&self.transaction, ())
    }

    /// Runs `body` in a frame nested in this one, on the same task.
    pub async fn transaction<F>(&self, body: F) -> Result<()>
    where
        F: for<'t> FnOnce(&'t AsyncTransactionWithoutReturn<'_>) -> BoxFuture<'t, Result<()>>
            + Send,
    {
        self.transacter.transaction(false, body).await
    }

    /// Runs `body` in a nested frame and returns its result.
    pub async fn transaction_with_result<R, F>(&self, body: F) -> Result<R>
    where
        R: Send + 'static,
        F: for<'t> FnOnce(&'t AsyncTransactionWithReturn<'_, R>) -> BoxFuture<'t, Result<R>>
            + Send,
    {
        self.transacter.transaction_with_result(false, body).await
    }
}

/// Handle for an async transaction body that returns an `R`.
pub struct AsyncTransactionWithReturn<'a, R> {
    transacter: &'a AsyncTransacter,
    transaction: Transaction,
    _result: PhantomData<fn() -> R>,
}

impl<'a, R> AsyncTransactionWithReturn<'a, R> {
    pub(crate) fn new(transacter: &'a AsyncTransacter, transaction: Transaction) -> Self {
        Self {
            transacter,
            transaction,
            _result: PhantomData,
        }
    }

    /// Rolls back the whole transaction tree; the root frame returns `value`.
    ///
    /// # Panics
    ///
    /// Panics when called from a task other than the one running the frame.
    pub fn rollback<T>(&self, value: R) -> Result<T>
    where
        R: Send + Sync + 'static,
    {
        rollback_with(&self.transaction, value)
    }

    /// Runs `body` in a frame nested in this one, on the same task.
    pub async fn transaction<F>(&self, body: F) -> Result<()>
    where
        F: for<'t> FnOnce(&'t AsyncTransactionWithoutReturn<'_>) -> BoxFuture<'t, Result<()>>
            + Send,
    {
        self.transacter.transaction(false, body).await
    }

    /// Runs `body` in a nested frame that returns an `S`.
    pub async fn transaction_with_result<S, F>(&self, body: F) -> Result<S>
    where
        S: Send + 'static,
        F: for<'t> FnOnce(&'t AsyncTransactionWithReturn<'_, S>) -> BoxFuture<'t, Result<S>>
            + Send,
    {
        self.transacter.transaction_with_result(false, body).await
    }
}

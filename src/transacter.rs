use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::{TransactionWithReturn, TransactionWithoutReturn};
use crate::driver::SqlDriver;
use crate::error::{Error, Result};
use crate::transaction::{self, FrameGuard};

/// Runs transaction bodies against a blocking [`SqlDriver`].
///
/// Generated query code holds a `Transacter` and calls
/// [`notify_queries`](Self::notify_queries) after every mutation. Frames opened
/// while another frame is active on the same thread nest inside it and share
/// its physical transaction.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sqlx_transacter::{SqlDriver, Transacter, TransactionCallbacks};
///
/// # fn example(driver: Arc<dyn SqlDriver>) -> sqlx_transacter::Result<()> {
/// let transacter = Transacter::new(driver);
///
/// let inserted = transacter.transaction_with_result(false, |tx| {
///     tx.after_commit(|| {
///         println!("committed");
///         Ok(())
///     });
///     tx.transaction(|nested| {
///         // nested frames commit or roll back with the root
///         Ok(())
///     })?;
///     Ok(1)
/// })?;
/// assert_eq!(inserted, 1);
/// # Ok(())
/// # }
/// ```
pub struct Transacter {
    driver: Arc<dyn SqlDriver>,
}

impl Transacter {
    /// Creates a transacter over `driver`.
    ///
    /// Generated query code shares one transacter per driver; it holds no
    /// per-transaction state of its own.
    pub fn new(driver: Arc<dyn SqlDriver>) -> Self {
        Self { driver }
    }

    /// The driver this transacter begins and ends transactions on.
    pub fn driver(&self) -> &Arc<dyn SqlDriver> {
        &self.driver
    }

    /// Runs `body` in a transaction.
    ///
    /// If a transaction is already active on this thread the body runs in a
    /// nested frame, unless `no_enclosing` is set, in which case
    /// [`Error::AlreadyInTransaction`] is returned without running it.
    ///
    /// A body that panics leaves the frame rolled back and the thread's
    /// current transaction restored before the panic continues unwinding.
    ///
    /// # Errors
    ///
    /// Returns the body's error after the frame has been rolled back, a
    /// hook failure, or a driver failure while ending the transaction.
    pub fn transaction<F>(&self, no_enclosing: bool, body: F) -> Result<()>
    where
        F: FnOnce(&TransactionWithoutReturn<'_>) -> Result<()>,
    {
        let guard = self.begin(no_enclosing)?;
        let outcome = body(&TransactionWithoutReturn::new(
            self,
            guard.transaction().clone(),
        ));
        self.finish(guard, outcome)
    }

    /// Runs `body` in a transaction and returns its result.
    ///
    /// A rollback carrying a value is returned as `Ok(value)` by the root frame.
    ///
    /// # Errors
    ///
    /// Same as [`transaction`](Self::transaction). A rollback value of a type
    /// other than `R` reaching the root is returned as [`Error::RolledBack`].
    pub fn transaction_with_result<R, F>(&self, no_enclosing: bool, body: F) -> Result<R>
    where
        R: 'static,
        F: FnOnce(&TransactionWithReturn<'_, R>) -> Result<R>,
    {
        let guard = self.begin(no_enclosing)?;
        let outcome = body(&TransactionWithReturn::new(self, guard.transaction().clone()));
        self.finish(guard, outcome)
    }

    /// Records that query `identifier` modified the tables it emits.
    ///
    /// Inside a transaction the tables are batched and each distinct
    /// identifier contributes once; listeners are notified after the root
    /// commits. Outside a transaction listeners are notified immediately.
    pub fn notify_queries<P>(&self, identifier: i32, table_provider: P)
    where
        P: FnOnce(&mut dyn FnMut(&str)),
    {
        transaction::notify_queries(
            self.driver.current_transaction(),
            identifier,
            table_provider,
            |tables| self.driver.notify_listeners(tables),
        );
    }

    fn begin(&self, no_enclosing: bool) -> Result<FrameGuard<'_>> {
        let transaction = self.driver.new_transaction()?;
        if no_enclosing && !transaction.is_root() {
            warn!(target: "sqlx_transacter::txn", "Rejected exclusive transaction inside another transaction");
            let successful = transaction.end();
            self.driver.end_transaction(&transaction, successful)?;
            return Err(Error::AlreadyInTransaction);
        }
        debug!(target: "sqlx_transacter::txn", root = transaction.is_root(), "Transaction started");

        let driver: &dyn SqlDriver = &*self.driver;
        Ok(FrameGuard::new(transaction, move |transaction| {
            if let Err(error) = driver.end_transaction(transaction, false) {
                warn!(target: "sqlx_transacter::txn", error = %error, "Failed to end an unfinished transaction");
            }
        }))
    }

    fn finish<R: 'static>(&self, guard: FrameGuard<'_>, outcome: Result<R>) -> Result<R> {
        if outcome.is_ok() {
            guard.transaction().mark_successful();
        }
        let successful = guard.transaction().end();
        let ended = self.driver.end_transaction(guard.transaction(), successful);
        let transaction = guard.disarm();
        if let Err(error) = ended {
            transaction.abort();
            transaction.settle_aborted();
            return Err(error);
        }
        debug!(
            target: "sqlx_transacter::txn",
            root = transaction.is_root(),
            successful,
            "Transaction finished"
        );
        transaction.settle(outcome, |tables| self.driver.notify_listeners(tables))
    }
}

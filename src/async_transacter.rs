use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::context::{AsyncTransactionWithReturn, AsyncTransactionWithoutReturn};
use crate::driver::AsyncSqlDriver;
use crate::error::{Error, Result};
use crate::owner;
use crate::transaction::{self, FrameGuard};

/// Runs async transaction bodies against an [`AsyncSqlDriver`].
///
/// Every root frame runs inside its own task scope, so frames opened from the
/// same task nest and concurrent tasks sharing the transacter stay isolated.
/// The returned future completes once the frame has been committed or rolled
/// back and its hooks have run. Dropping the future before then (a timeout,
/// `select!` or an aborted task) rolls the frame back and releases it through
/// [`AsyncSqlDriver::abandon_transaction`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use futures::FutureExt;
/// use sqlx_transacter::{AsyncTransacter, MySqlDriver, TransactionCallbacks};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let driver = Arc::new(MySqlDriver::connect("mysql://localhost/test").await?);
/// let transacter = AsyncTransacter::new(driver.clone());
///
/// transacter.transaction(false, |tx| {
///     let driver = driver.clone();
///     async move {
///         driver
///             .execute(sqlx::query("INSERT INTO users (name) VALUES (?)").bind("Alice"))
///             .await?;
///         tx.after_commit(|| Ok(()));
///         Ok::<_, sqlx_transacter::Error>(())
///     }
///     .boxed()
/// }).await?;
/// # Ok(())
/// # }
/// ```
pub struct AsyncTransacter {
    driver: Arc<dyn AsyncSqlDriver>,
}

impl AsyncTransacter {
    /// Creates a transacter over `driver`.
    pub fn new(driver: Arc<dyn AsyncSqlDriver>) -> Self {
        Self { driver }
    }

    /// The driver this transacter begins and ends transactions on.
    pub fn driver(&self) -> &Arc<dyn AsyncSqlDriver> {
        &self.driver
    }

    /// Runs `body` in a transaction.
    ///
    /// Nests inside the calling task's active transaction unless
    /// `no_enclosing` is set, which fails with
    /// [`Error::AlreadyInTransaction`] instead.
    ///
    /// # Errors
    ///
    /// Returns the body's error after the frame has been rolled back, a
    /// hook failure, or a driver failure while beginning or ending the
    /// transaction.
    pub async fn transaction<F>(&self, no_enclosing: bool, body: F) -> Result<()>
    where
        F: for<'t> FnOnce(&'t AsyncTransactionWithoutReturn<'_>) -> BoxFuture<'t, Result<()>>
            + Send,
    {
        owner::in_task_scope(async move {
            let guard = self.begin(no_enclosing).await?;
            let wrapper = AsyncTransactionWithoutReturn::new(self, guard.transaction().clone());
            let outcome = body(&wrapper).await;
            self.finish(guard, outcome).await
        })
        .await
    }

    /// Runs `body` in a transaction and returns its result.
    ///
    /// # Errors
    ///
    /// Same as [`transaction`](Self::transaction).
    pub async fn transaction_with_result<R, F>(&self, no_enclosing: bool, body: F) -> Result<R>
    where
        R: Send + 'static,
        F: for<'t> FnOnce(&'t AsyncTransactionWithReturn<'_, R>) -> BoxFuture<'t, Result<R>>
            + Send,
    {
        owner::in_task_scope(async move {
            let guard = self.begin(no_enclosing).await?;
            let wrapper = AsyncTransactionWithReturn::new(self, guard.transaction().clone());
            let outcome = body(&wrapper).await;
            self.finish(guard, outcome).await
        })
        .await
    }

    /// See [`Transacter::notify_queries`](crate::Transacter::notify_queries).
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

    async fn begin(&self, no_enclosing: bool) -> Result<FrameGuard<'_>> {
        let transaction = self.driver.new_transaction().await?;
        let driver: &dyn AsyncSqlDriver = &*self.driver;
        let guard = FrameGuard::new(transaction, move |transaction| {
            driver.abandon_transaction(transaction)
        });

        if no_enclosing && !guard.transaction().is_root() {
            warn!(target: "sqlx_transacter::txn", "Rejected exclusive transaction inside another transaction");
            let successful = guard.transaction().end();
            let ended = self
                .driver
                .end_transaction(guard.transaction(), successful)
                .await;
            guard.disarm();
            ended?;
            return Err(Error::AlreadyInTransaction);
        }
        debug!(target: "sqlx_transacter::txn", root = guard.transaction().is_root(), "Transaction started");
        Ok(guard)
    }

    async fn finish<R: 'static>(&self, guard: FrameGuard<'_>, outcome: Result<R>) -> Result<R> {
        if outcome.is_ok() {
            guard.transaction().mark_successful();
        }
        let successful = guard.transaction().end();
        let ended = self
            .driver
            .end_transaction(guard.transaction(), successful)
            .await;
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

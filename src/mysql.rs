use std::collections::{BTreeSet, HashMap};
use std::ops::DerefMut;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use sqlx::mysql::{MySql, MySqlArguments, MySqlPool, MySqlQueryResult, MySqlRow};
use sqlx::query::Query;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::driver::{AsyncSqlDriver, TransactionSlots};
use crate::error::{Error, Result};
use crate::listener::{ListenerRegistry, QueryListener};
use crate::owner::OwnerId;
use crate::transaction::Transaction;

type Connection = Arc<AsyncMutex<Option<sqlx::Transaction<'static, MySql>>>>;

/// [`AsyncSqlDriver`] backed by a MySQL connection pool.
///
/// Each task's root frame checks a connection out of the pool and begins an
/// SQLx transaction on it; nested frames join that transaction. Queries run
/// through [`execute`](Self::execute) or [`fetch_all`](Self::fetch_all) use
/// the calling task's transaction when one is active, and the pool otherwise.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sqlx_transacter::{AsyncTransacter, MySqlDriver};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let driver = Arc::new(MySqlDriver::connect("mysql://localhost/test").await?);
/// driver.add_listener(&["users"], Arc::new(|| println!("users changed")));
///
/// let transacter = AsyncTransacter::new(driver.clone());
/// # Ok(())
/// # }
/// ```
pub struct MySqlDriver {
    pool: MySqlPool,
    slots: TransactionSlots,
    connections: Mutex<HashMap<OwnerId, Connection>>,
    listeners: ListenerRegistry,
}

impl MySqlDriver {
    /// Wraps an existing pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            slots: TransactionSlots::new(),
            connections: Mutex::new(HashMap::new()),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Connects a new pool to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(MySqlPool::connect(url).await?))
    }

    /// The underlying pool, for queries that must run outside any transaction.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Registers `listener` for invalidations of any of `tables`.
    pub fn add_listener(&self, tables: &[&str], listener: Arc<dyn QueryListener>) {
        self.listeners.add_listener(tables, listener);
    }

    /// Unregisters `listener` from `tables`.
    pub fn remove_listener(&self, tables: &[&str], listener: &Arc<dyn QueryListener>) {
        self.listeners.remove_listener(tables, listener);
    }

    /// Executes `query` inside the caller's transaction, or on the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConsumed`] if the caller's transaction has
    /// already been committed or rolled back, or the SQLx error.
    pub async fn execute<'q>(
        &self,
        query: Query<'q, MySql, MySqlArguments>,
    ) -> Result<MySqlQueryResult> {
        match self.connection() {
            Some(connection) => {
                let mut tx = connection.lock().await;
                let tx = tx.as_mut().ok_or(Error::AlreadyConsumed)?;
                Ok(query.execute(tx.deref_mut()).await?)
            }
            None => Ok(query.execute(&self.pool).await?),
        }
    }

    /// Fetches all rows of `query` inside the caller's transaction, or on the pool.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn fetch_all<'q>(
        &self,
        query: Query<'q, MySql, MySqlArguments>,
    ) -> Result<Vec<MySqlRow>> {
        match self.connection() {
            Some(connection) => {
                let mut tx = connection.lock().await;
                let tx = tx.as_mut().ok_or(Error::AlreadyConsumed)?;
                Ok(query.fetch_all(tx.deref_mut()).await?)
            }
            None => Ok(query.fetch_all(&self.pool).await?),
        }
    }

    fn connection(&self) -> Option<Connection> {
        self.connections.lock().get(&OwnerId::current()).cloned()
    }

    async fn finish_physical(&self, transaction: &Transaction, successful: bool) -> Result<()> {
        let connection = self.connections.lock().remove(&transaction.owner());
        let Some(connection) = connection else {
            return Ok(());
        };
        let tx = connection.lock().await.take().ok_or(Error::AlreadyConsumed)?;
        if successful {
            tx.commit().await?;
            debug!(target: "sqlx_transacter::txn", "Physical transaction committed");
        } else {
            tx.rollback().await?;
            debug!(target: "sqlx_transacter::txn", "Physical transaction rolled back");
        }
        Ok(())
    }
}

impl AsyncSqlDriver for MySqlDriver {
    fn new_transaction(&self) -> BoxFuture<'_, Result<Transaction>> {
        async move {
            let enclosing = self.slots.current();
            if enclosing.is_none() {
                let tx = self.pool.begin().await?;
                debug!(target: "sqlx_transacter::txn", "Physical transaction started");
                self.connections
                    .lock()
                    .insert(OwnerId::current(), Arc::new(AsyncMutex::new(Some(tx))));
            }
            Ok(self.slots.enter(enclosing))
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
        async move {
            let result = if transaction.is_root() {
                self.finish_physical(transaction, successful).await
            } else {
                Ok(())
            };
            self.slots.exit(transaction);
            result
        }
        .boxed()
    }

    fn abandon_transaction(&self, transaction: &Transaction) {
        if transaction.is_root() {
            // dropping the SQLx transaction queues its rollback and returns
            // the connection to the pool
            let abandoned = self.connections.lock().remove(&transaction.owner());
            drop(abandoned);
            debug!(target: "sqlx_transacter::txn", "Physical transaction abandoned");
        }
        self.slots.exit(transaction);
    }

    fn notify_listeners(&self, table_names: &BTreeSet<String>) {
        self.listeners.notify(table_names);
    }
}

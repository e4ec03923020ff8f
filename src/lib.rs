//! # sqlx-transacter
//!
//! Transaction coordination runtime for generated SQLx data-access code.
//!
//! Generated query and mutation functions run inside logical transactions
//! that nest over a single physical transaction per thread or task. The
//! runtime tracks hooks and invalidated tables for every frame and merges them
//! into the enclosing frame. At the outermost frame it commits or rolls back
//! and notifies query-result listeners once per affected table set.
//!
//! ## Features
//!
//! - **Nested Transactions**: Inner frames join the outer physical transaction; any failing frame rolls back the whole tree
//! - **Hooks**: `after_commit` / `after_rollback` callbacks that run once, in registration order, after the root finishes
//! - **Rollback With a Value**: `rollback(value)` unwinds every nested frame and becomes the root's return value
//! - **Batched Invalidation**: Each distinct mutation contributes its tables once per transaction, however often it runs
//! - **Thread Confinement**: Using a transaction handle from another thread or task panics
//! - **Blocking and Async Engines**: [`Transacter`] over [`SqlDriver`], [`AsyncTransacter`] over [`AsyncSqlDriver`]
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! sqlx = { version = "0.8", features = ["mysql", "runtime-tokio"] }
//! sqlx-transacter = "0.1"
//! ```
//!
//! ## Examples
//!
//! ### Basic Transaction
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use sqlx_transacter::{AsyncTransacter, MySqlDriver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Arc::new(MySqlDriver::connect("mysql://localhost/test").await?);
//! let transacter = AsyncTransacter::new(driver.clone());
//!
//! transacter.transaction(false, |_tx| {
//!     let driver = driver.clone();
//!     async move {
//!         driver
//!             .execute(sqlx::query("INSERT INTO users (name) VALUES (?)").bind("Alice"))
//!             .await?;
//!         Ok::<_, sqlx_transacter::Error>(())
//!     }
//!     .boxed()
//! }).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Rollback With a Value
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sqlx_transacter::{SqlDriver, Transacter};
//!
//! # fn example(driver: Arc<dyn SqlDriver>) -> sqlx_transacter::Result<()> {
//! let transacter = Transacter::new(driver);
//!
//! // the rollback unwinds the outer frame too and becomes its result
//! let value = transacter.transaction_with_result(false, |tx| {
//!     tx.transaction_with_result(|nested| nested.rollback(7))?;
//!     Ok(0)
//! })?;
//! assert_eq!(value, 7);
//!
//! let value = transacter.transaction_with_result(false, |tx| tx.rollback(42))?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ### Batched Invalidation
//!
//! Generated mutations report the tables they touch after executing:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sqlx_transacter::{SqlDriver, Transacter};
//!
//! const INSERT_USER: i32 = 0x1f3a_9c01;
//!
//! # fn example(driver: Arc<dyn SqlDriver>) -> sqlx_transacter::Result<()> {
//! let transacter = Transacter::new(driver);
//! transacter.transaction(false, |_tx| {
//!     for _ in 0..1000 {
//!         // ... execute the insert ...
//!         transacter.notify_queries(INSERT_USER, |emit| emit("users"));
//!     }
//!     Ok(())
//! })?;
//! // listeners of "users" were notified once, after the commit
//! # Ok(())
//! # }
//! ```
//!
//! ## How It Works
//!
//! 1. **Driver**: Hands out a [`Transaction`] record per frame and owns the per-owner "current transaction" slot ([`TransactionSlots`])
//! 2. **Wrappers**: Bodies receive a [`TransactionWithoutReturn`] / [`TransactionWithReturn`] handle, never the record
//! 3. **Finalize**: Each frame ends its record exactly once; nested frames merge into their parent, root frames commit or roll back
//! 4. **Notify**: After a root commit, pending tables go to [`SqlDriver::notify_listeners`] in one call, then commit hooks run
//! 5. **Drop Guard**: A frame left by a panic or a dropped future is rolled back and its driver slot released
//!
//! ## Limitations
//!
//! - No built-in timeout: a hung body blocks its thread or task until the caller drops the future
//! - A panicking body rolls its frame back while unwinding, but the panic is not turned into an error
//! - Bundled physical driver is MySQL only ([`MySqlDriver`])
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.

pub mod async_transacter;
pub mod context;
pub mod driver;
pub mod error;
pub mod listener;
pub mod mysql;
pub mod owner;
pub mod transacter;
pub mod transaction;

#[cfg(feature = "anyhow")]
pub mod anyhow_compat;

pub use async_transacter::AsyncTransacter;
pub use context::{
    AsyncTransactionWithReturn, AsyncTransactionWithoutReturn, TransactionCallbacks,
    TransactionWithReturn, TransactionWithoutReturn,
};
pub use driver::{AsyncSqlDriver, SqlDriver, TransactionSlots};
pub use error::{BoxError, Error, Result};
pub use listener::{ListenerRegistry, QueryListener};
pub use mysql::MySqlDriver;
pub use owner::OwnerId;
pub use transacter::Transacter;
pub use transaction::Transaction;

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::async_transacter::AsyncTransacter;
    pub use crate::context::TransactionCallbacks;
    pub use crate::error::{Error, Result};
    pub use crate::transacter::Transacter;
}

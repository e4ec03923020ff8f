//! `anyhow` interoperability, enabled by the `anyhow` feature.
//!
//! Transaction bodies return [`crate::Result`]. With this feature an
//! `anyhow::Error` converts into [`Error::Other`] so bodies can use `?` on
//! `anyhow::Result` values directly. The reverse direction needs no support:
//! [`Error`] is `Send + Sync + 'static` and converts into `anyhow::Error`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sqlx_transacter::{SqlDriver, Transacter};
//!
//! fn validate(name: &str) -> anyhow::Result<()> {
//!     anyhow::ensure!(!name.is_empty(), "name must not be empty");
//!     Ok(())
//! }
//!
//! # fn example(driver: Arc<dyn SqlDriver>) -> anyhow::Result<()> {
//! let transacter = Transacter::new(driver);
//! transacter.transaction(false, |_tx| {
//!     validate("Alice")?;
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

use crate::error::Error;

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Other(error.into())
    }
}

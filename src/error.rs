use std::any::Any;
use std::fmt;

/// Boxed error used for hook and driver failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for transaction coordination
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLx
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The physical transaction has already been consumed (committed or rolled back)
    #[error("Transaction has already been consumed")]
    AlreadyConsumed,

    /// `no_enclosing` was requested while a transaction is active on this thread or task
    #[error("Already in a transaction")]
    AlreadyInTransaction,

    /// A transaction body called `rollback`. Converted to a value at the root frame.
    #[error("Transaction was rolled back")]
    RolledBack(RollbackSignal),

    /// A commit hook failed, or a rollback hook failed without a prior error
    #[error("Transaction hook failed: {0}")]
    Hook(#[source] BoxError),

    /// A rollback hook failed while unwinding from another error
    #[error(
        "Exception while rolling back from an exception.\nOriginal exception: {}\nwith cause {}\n\nRollback exception: {}",
        .original,
        cause_of(.original),
        .rollback
    )]
    RollbackFailed {
        original: Box<Error>,
        #[source]
        rollback: BoxError,
    },

    /// Failure raised by a transaction body or a driver
    #[error(transparent)]
    Other(#[from] BoxError),
}

impl Error {
    /// Wraps an arbitrary error so it can be returned from a transaction body.
    pub fn other<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Other(error.into())
    }

    /// Returns `true` if this error is the rollback signal.
    pub fn is_rollback(&self) -> bool {
        matches!(self, Error::RolledBack(_))
    }
}

fn cause_of(error: &Error) -> String {
    match std::error::Error::source(error) {
        Some(cause) => cause.to_string(),
        None => "null".to_string(),
    }
}

/// Value carried by `rollback`, unwound through nested frames up to the root.
pub struct RollbackSignal {
    value: Box<dyn Any + Send + Sync>,
}

impl RollbackSignal {
    pub(crate) fn new<R>(value: R) -> Self
    where
        R: Any + Send + Sync,
    {
        Self {
            value: Box::new(value),
        }
    }

    /// Recovers the carried value, or gives the signal back if it holds another type.
    pub(crate) fn into_value<R: 'static>(self) -> std::result::Result<R, Self> {
        match self.value.downcast::<R>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Self { value }),
        }
    }
}

impl fmt::Debug for RollbackSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackSignal").finish_non_exhaustive()
    }
}

/// Result type alias for transaction operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_error_mentions_both_failures() {
        let original = Error::other("ExceptionB");
        let error = Error::RollbackFailed {
            original: Box::new(original),
            rollback: "ExceptionA".into(),
        };
        let text = error.to_string();
        assert!(text.contains("ExceptionA"));
        assert!(text.contains("ExceptionB"));
        assert!(text.starts_with("Exception while rolling back from an exception."));
        assert!(text.contains("with cause null"), "{text}");
    }

    #[test]
    fn test_other_is_transparent() {
        let error = Error::other("ExceptionB");
        assert_eq!(error.to_string(), "ExceptionB");
        assert!(std::error::Error::source(&error).is_none());

        let error = Error::other(Error::Hook("ExceptionA".into()));
        let cause = std::error::Error::source(&error).unwrap();
        assert_eq!(cause.to_string(), "ExceptionA");
    }

    #[test]
    fn test_rollback_signal_downcast() {
        let signal = RollbackSignal::new(42_i32);
        let signal = signal.into_value::<String>().unwrap_err();
        assert_eq!(signal.into_value::<i32>().unwrap(), 42);
    }
}

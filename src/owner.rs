//! Identity of the thread or task that owns a transaction.
//!
//! Synchronous transactions are owned by the OS thread that created them.
//! Asynchronous transactions may migrate between worker threads, so the async
//! engine runs every root frame inside a task-local scope carrying a
//! [`TaskKey`]; code polled inside that scope is owned by the key instead.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

tokio::task_local! {
    static TASK_KEY: TaskKey;
}

/// Global task key generator
static NEXT_TASK_KEY: AtomicU64 = AtomicU64::new(1);

/// Identifier of one logical async task running transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey(u64);

impl TaskKey {
    fn next() -> Self {
        TaskKey(NEXT_TASK_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// The thread or task a transaction is confined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerId {
    Thread(ThreadId),
    Task(TaskKey),
}

impl OwnerId {
    /// Returns the owner identity of the calling code.
    pub fn current() -> Self {
        TASK_KEY
            .try_with(|key| OwnerId::Task(*key))
            .unwrap_or_else(|_| OwnerId::Thread(thread::current().id()))
    }
}

/// Runs `future` inside a task scope, allocating a fresh key unless one is
/// already active.
pub(crate) async fn in_task_scope<F: Future>(future: F) -> F::Output {
    if TASK_KEY.try_with(|_| ()).is_ok() {
        future.await
    } else {
        TASK_KEY.scope(TaskKey::next(), future).await
    }
}

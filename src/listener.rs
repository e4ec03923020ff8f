//! Query-result listener registry used by the bundled drivers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

/// Receives a notification when a table it observes has been invalidated.
pub trait QueryListener: Send + Sync {
    fn query_results_changed(&self);
}

impl<F> QueryListener for F
where
    F: Fn() + Send + Sync,
{
    fn query_results_changed(&self) {
        self()
    }
}

/// Table name to listener fan-out.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<Arc<dyn QueryListener>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for every table in `tables`.
    pub fn add_listener(&self, tables: &[&str], listener: Arc<dyn QueryListener>) {
        let mut listeners = self.listeners.lock();
        for table in tables {
            listeners
                .entry((*table).to_owned())
                .or_default()
                .push(Arc::clone(&listener));
        }
    }

    pub fn remove_listener(&self, tables: &[&str], listener: &Arc<dyn QueryListener>) {
        let mut listeners = self.listeners.lock();
        for table in tables {
            if let Some(registered) = listeners.get_mut(*table) {
                registered.retain(|l| !same_listener(l, listener));
                if registered.is_empty() {
                    listeners.remove(*table);
                }
            }
        }
    }

    /// Notifies each listener registered on any of `tables` exactly once.
    pub fn notify(&self, tables: &BTreeSet<String>) {
        let to_notify = {
            let listeners = self.listeners.lock();
            let mut to_notify: Vec<Arc<dyn QueryListener>> = Vec::new();
            for listener in tables.iter().filter_map(|t| listeners.get(t)).flatten() {
                if !to_notify.iter().any(|l| same_listener(l, listener)) {
                    to_notify.push(Arc::clone(listener));
                }
            }
            to_notify
        };
        for listener in to_notify {
            listener.query_results_changed();
        }
    }
}

fn same_listener(a: &Arc<dyn QueryListener>, b: &Arc<dyn QueryListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

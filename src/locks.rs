//! Per-key write serialization

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Proof that the caller holds the write lock for one key.
///
/// Only [`DocumentLocks::with_document`] can hand one out, so anything that
/// takes a `&DocumentGuard` runs under that key's lock.
#[derive(Debug)]
pub struct DocumentGuard<'a> {
    id: &'a str,
}

impl DocumentGuard<'_> {
    pub fn id(&self) -> &str {
        self.id
    }
}

#[derive(Debug, Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `id`. Different ids never contend.
    pub fn with_document<T>(&self, id: &str, f: impl FnOnce(&DocumentGuard<'_>) -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(id.to_string()).or_default())
        };

        let result = {
            let _held = lock.lock();
            f(&DocumentGuard { id })
        };

        // drop the entry once nobody else is waiting on it
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
        result
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}

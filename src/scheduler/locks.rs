//! Keyed async command locks.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One FIFO mutex per key, created on first use.
///
/// tokio's mutex queues waiters fairly, so commands on the same key apply in
/// the order they were submitted.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Waits for and takes the lock for `key`.
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = Arc::clone(&self.locks.entry(key.to_string()).or_default());
        mutex.lock_owned().await
    }

    /// Drops the entry for `key` if nobody holds or waits for it.
    pub(crate) fn forget(&self, key: &str) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

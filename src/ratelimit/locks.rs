//! Per-key mutual exclusion.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A table of async mutexes, one per key.
///
/// Callers for the same key queue on one mutex; different keys never share
/// one. Entries are dropped as soon as nobody holds or waits on them, so the
/// table only grows with the number of keys currently in flight.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Exclusive access to one key until dropped.
pub(crate) struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Cancelling the wait still releases the key's table entry.
    pub(crate) async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        // Declared before the wait so it is dropped after the pending lock.
        let mut held = KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: None,
        };
        // The shard lock is released at the end of this statement, before awaiting.
        let mutex = Arc::clone(&self.locks.entry(key.to_string()).or_default());
        held.guard = Some(mutex.lock_owned().await);
        held
    }

    /// Number of keys currently locked or awaited.
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the table's own reference left means no holder and no waiter.
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

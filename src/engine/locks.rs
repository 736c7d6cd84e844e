use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::DayKey;

type LockTable = DashMap<DayKey, Arc<Mutex<()>>>;

/// Advisory locks keyed by (room, date).
///
/// Every admission decision for a day key runs while holding that key's
/// lock, so check-then-write cannot interleave with another writer on the
/// same room and day. Writers on different keys never contend.
#[derive(Clone, Default)]
pub struct DayLocks {
    table: Arc<LockTable>,
}

/// Held locks. Dropping releases them.
pub struct DayLease {
    guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<DayKey>,
    table: Arc<LockTable>,
}

impl DayLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key in `keys`. Keys are deduplicated and taken in sorted
    /// order so two writers locking overlapping sets cannot deadlock.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = DayKey>) -> DayLease {
        let mut keys: Vec<DayKey> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let mutex = self.table.entry(*key).or_default().value().clone();
            guards.push(mutex.lock_owned().await);
        }
        DayLease {
            guards,
            keys,
            table: self.table.clone(),
        }
    }

    /// Number of keys with a live mutex.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl DayLease {
    pub fn keys(&self) -> &[DayKey] {
        &self.keys
    }
}

impl Drop for DayLease {
    fn drop(&mut self) {
        self.guards.clear();
        // Only the table still points at an idle mutex.
        for key in &self.keys {
            self.table.remove_if(key, |_, m| Arc::strong_count(m) == 1);
        }
    }
}

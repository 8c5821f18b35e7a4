/// Keyed mutual exclusion.
///
/// One async mutex per key, created on first use and dropped when the last
/// holder or waiter goes away. Callers working on different keys never
/// wait on each other.
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

pub struct KeyedLocks<K: Eq + Hash + Clone> {
    slots: Slots<K>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and take it. The guard is `'static` and can
    /// be moved into a spawned task.
    pub async fn acquire(&self, key: K) -> KeyedGuard<K> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key.clone()).or_default().clone()
        };
        // Declared before the wait so it drops after the `lock_owned` future
        // if the caller gives up while queued.
        let mut waiter = Waiter {
            key: Some(key.clone()),
            slots: self.slots.clone(),
        };
        let guard = slot.lock_owned().await;
        waiter.key = None;
        KeyedGuard {
            key,
            guard: Some(guard),
            slots: self.slots.clone(),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct KeyedGuard<K: Eq + Hash + Clone> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots<K>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.slots, &self.key);
    }
}

/// A caller queued on a key. Cleans up the slot if the wait is abandoned.
struct Waiter<K: Eq + Hash + Clone> {
    key: Option<K>,
    slots: Slots<K>,
}

impl<K: Eq + Hash + Clone> Drop for Waiter<K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            prune(&self.slots, &key);
        }
    }
}

/// Remove `key` if only the map still holds its slot.
fn prune<K: Eq + Hash + Clone>(slots: &Slots<K>, key: &K) {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    if slots
        .get(key)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        slots.remove(key);
    }
}

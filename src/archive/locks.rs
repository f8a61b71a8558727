use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

/// One async mutex per key, created on first use and dropped once nobody
/// holds or waits for it.
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    locks: Arc<LockMap<K>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let mutex = {
            let mut map = lock_map(&self.locks);
            prune_idle(&mut map);
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    ///
    /// A waiter whose future is dropped after the holder released but before
    /// it was polled again leaves an entry nobody references. Such entries are
    /// pruned here and on every `lock`.
    pub fn active(&self) -> usize {
        let mut map = lock_map(&self.locks);
        prune_idle(&mut map);
        map.len()
    }
}

/// Holds the lock for one key until dropped.
pub struct KeyedGuard<K: Eq + Hash + Clone> {
    key: K,
    locks: Arc<LockMap<K>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        let mut map = lock_map(&self.locks);
        // Release before counting so the map's reference is the only one left when idle.
        self.guard.take();
        let idle = map
            .get(&self.key)
            .map(|m| Arc::strong_count(m) == 1)
            .unwrap_or(false);
        if idle {
            map.remove(&self.key);
        }
    }
}

fn prune_idle<K>(map: &mut HashMap<K, Arc<AsyncMutex<()>>>) {
    map.retain(|_, mutex| Arc::strong_count(mutex) > 1);
}

fn lock_map<K>(locks: &LockMap<K>) -> MutexGuard<'_, HashMap<K, Arc<AsyncMutex<()>>>> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

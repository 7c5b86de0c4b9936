//! Per-key critical sections
//!
//! Recomputes of the same parent are serialized; different parents never
//! contend. The map only holds weak references, so a key's mutex lives
//! exactly as long as someone holds or waits for it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Dead entries are swept once the map grows past this size
const SWEEP_THRESHOLD: usize = 256;

/// Guard for one key; the critical section ends when it is dropped
pub type KeyGuard = OwnedMutexGuard<()>;

/// Async mutexes keyed by `K`
#[derive(Debug)]
pub struct KeyedLocks<K> {
    entries: Mutex<HashMap<K, Weak<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Hash + Eq + Clone> KeyedLocks<K> {
    /// Empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    ///
    /// Waiters on one key are served in FIFO order.
    pub async fn lock(&self, key: &K) -> KeyGuard {
        let mutex = self.mutex_for(key);
        mutex.lock_owned().await
    }

    /// Keys currently held or awaited
    pub fn active(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    fn mutex_for(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, entry| entry.strong_count() > 0);
        }
        let mutex = Arc::new(AsyncMutex::new(()));
        entries.insert(key.clone(), Arc::downgrade(&mutex));
        mutex
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock(&"clinics:c1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&"clinics:c1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _first = locks.lock(&"clinics:c1").await;
        let second =
            tokio::time::timeout(Duration::from_millis(50), locks.lock(&"clinics:c2")).await;
        assert!(second.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn released_keys_are_forgotten() {
        let locks = KeyedLocks::new();
        for index in 0..(SWEEP_THRESHOLD * 2) {
            let _guard = locks.lock(&index).await;
        }
        assert_eq!(locks.active(), 0);
        assert!(locks.entries.lock().len() <= SWEEP_THRESHOLD + 1);
    }
}

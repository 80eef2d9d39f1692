use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-key async mutexes.
///
/// Serialises work on one booking inside this process. Entries are dropped
/// once nobody holds or waits on them.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    key: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: Uuid) -> KeyedGuard<'_> {
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map holds the Arc once every guard and waiter is gone.
        self.owner
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

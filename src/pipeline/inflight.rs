//! Per-key async locks.
//!
//! Two callers processing the same document fingerprint must not both miss
//! the cache and both pay for a remote call. The pipeline takes the lock for
//! a fingerprint before its first cache lookup and holds it until the result
//! is assembled; callers for other fingerprints never wait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// A set of async mutexes addressed by string key, created on demand.
#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

/// Holds the lock for one key. Dropping it releases the key and forgets the
/// slot once nobody else is waiting on it.
#[derive(Debug)]
pub struct KeyedGuard {
    key: String,
    slot: Slot,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots.entry(key.to_string()).or_default().clone()
        };
        let guard = slot.clone().lock_owned().await;
        KeyedGuard {
            key: key.to_string(),
            slot,
            slots: Arc::clone(&self.slots),
            _guard: guard,
        }
    }

    /// Number of keys currently locked or awaited.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map, one in this guard: no waiters.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}

//! Per-message mutual exclusion.
//!
//! [`KeyedLocks`] hands out one async mutex per [`EmailId`]. Hits for
//! different messages proceed concurrently; hits for the same message are
//! serialized for the whole recorder transaction.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::EmailId;

/// Idle entries are pruned once the map grows past this size.
const PRUNE_THRESHOLD: usize = 1_024;

/// Map of per-key locks.
///
/// The outer `RwLock` guards only the map; each entry is an
/// `Arc<Mutex<()>>` held for the duration of one recorder transaction.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: RwLock<HashMap<EmailId, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    /// Creates an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`. Access ends when the guard is
    /// dropped.
    pub async fn lock(&self, key: &EmailId) -> OwnedMutexGuard<()> {
        let existing = self.locks.read().await.get(key).map(Arc::clone);
        let entry = match existing {
            Some(entry) => entry,
            None => {
                let mut map = self.locks.write().await;
                if map.len() >= PRUNE_THRESHOLD {
                    // Only the map holds an idle entry.
                    map.retain(|_, lock| Arc::strong_count(lock) > 1);
                }
                Arc::clone(map.entry(key.clone()).or_default())
            }
        };
        entry.lock_owned().await
    }

    /// Number of keys currently in the map.
    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }

    /// Returns `true` if no key has ever been locked since the last prune.
    pub async fn is_empty(&self) -> bool {
        self.locks.read().await.is_empty()
    }
}

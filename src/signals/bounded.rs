//! Insertion-ordered map with a hard entry cap.
//!
//! When an insert pushes the map past its capacity the oldest-inserted
//! entries are evicted. Re-inserting an existing key moves it to the newest
//! position.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Capped map with FIFO eviction.
#[derive(Debug)]
pub struct BoundedMap<K, V> {
    entries: HashMap<K, (u64, V)>,
    order: BTreeMap<u64, K>,
    next_seq: u64,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> BoundedMap<K, V> {
    /// Creates an empty map holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces `key`, returning whatever was evicted to make room.
    pub fn insert(&mut self, key: K, value: V) -> Vec<(K, V)> {
        if let Some((old_seq, _)) = self.entries.remove(&key) {
            self.order.remove(&old_seq);
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.order.insert(seq, key.clone());
        self.entries.insert(key, (seq, value));

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some((_, value)) = self.entries.remove(&oldest) {
                evicted.push((oldest, value));
            }
        }
        evicted
    }

    /// Looks up `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(_, value)| value)
    }

    /// Looks up `key` mutably without changing its position.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(|(_, value)| value)
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (seq, value) = self.entries.remove(key)?;
        self.order.remove(&seq);
        Some(value)
    }

    /// Keeps entries for which `keep` returns `true`; returns the removed keys
    /// in insertion order.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &mut V) -> bool) -> Vec<K> {
        let mut removed = Vec::new();
        let entries = &mut self.entries;
        self.order.retain(|_, key| {
            let key: &K = key;
            let keep_it = entries
                .get_mut(key)
                .is_some_and(|(_, value)| keep(key, value));
            if !keep_it {
                entries.remove(key);
                removed.push(key.clone());
            }
            keep_it
        });
        removed
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .values()
            .filter_map(|key| self.entries.get(key).map(|(_, value)| (key, value)))
    }
}

//! Bounded map with random eviction.
//!
//! Backs the per-peer advert history. When full, inserting a new key evicts
//! a uniformly chosen existing entry.

use std::collections::HashMap;
use std::hash::Hash;

use rand::Rng;

pub struct RandomEvictionCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    keys: Vec<K>,
}

impl<K: Eq + Hash + Clone, V> RandomEvictionCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(4_096)),
            keys: Vec::with_capacity(capacity.min(4_096)),
        }
    }

    /// Insert or overwrite `key`.
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return;
        }
        if self.capacity == 0 {
            return;
        }
        if self.keys.len() >= self.capacity {
            let victim = rand::thread_rng().gen_range(0..self.keys.len());
            self.remove_at(victim);
        }
        self.entries.insert(key.clone(), value);
        self.keys.push(key);
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Keep only the entries for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        let mut i = 0;
        while i < self.keys.len() {
            let key = &self.keys[i];
            let retained = self
                .entries
                .get(key)
                .map(|value| keep(key, value))
                .unwrap_or(false);
            if retained {
                i += 1;
            } else {
                // swap_remove moves the last key into slot i; re-examine it
                self.remove_at(i);
            }
        }
    }

    fn remove_at(&mut self, index: usize) {
        let removed = self.keys.swap_remove(index);
        self.entries.remove(&removed);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

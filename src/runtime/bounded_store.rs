// src/runtime/bounded_store.rs
//! Capacity-bounded key/value store with least-recently-used eviction
//!
//! Not synchronised; owners wrap it in a lock. Recency is tracked with a
//! monotonically increasing access tick, so eviction is a linear scan over
//! at most `capacity` entries.

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    last_access: u64,
    inserted_at: Instant,
}

pub struct BoundedStore<V> {
    entries: HashMap<String, Slot<V>>,
    capacity: usize,
    ttl: Option<Duration>,
    tick: u64,
}

impl<V: Clone> BoundedStore<V> {
    pub fn new(capacity: usize) -> Self {
        Self::with_ttl(capacity, None)
    }

    pub fn with_ttl(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            capacity,
            ttl,
            tick: 0,
        }
    }

    /// Look up `key`, refreshing its recency. Expired entries are dropped.
    pub fn get(&mut self, key: &str) -> Option<V> {
        if self.is_expired(key) {
            self.entries.remove(key);
            return None;
        }
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|slot| {
            slot.last_access = tick;
            slot.value.clone()
        })
    }

    /// Insert or replace `key`. Returns the number of evicted entries.
    pub fn insert(&mut self, key: &str, value: V) -> usize {
        self.tick += 1;
        let mut evicted = 0;

        if !self.entries.contains_key(key) {
            evicted += self.purge_expired();
            while self.entries.len() >= self.capacity {
                if !self.evict_lru() {
                    break;
                }
                evicted += 1;
            }
        }

        self.entries.insert(
            key.to_string(),
            Slot {
                value,
                last_access: self.tick,
                inserted_at: Instant::now(),
            },
        );
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|slot| slot.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_expired(&self, key: &str) -> bool {
        match (self.ttl, self.entries.get(key)) {
            (Some(ttl), Some(slot)) => slot.inserted_at.elapsed() >= ttl,
            _ => false,
        }
    }

    fn purge_expired(&mut self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.inserted_at.elapsed() < ttl);
        before - self.entries.len()
    }

    fn evict_lru(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| slot.last_access)
            .map(|(key, _)| key.clone());

        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_insert_get_remove() {
        let mut store = BoundedStore::new(4);
        store.insert("a", 1);
        assert_eq!(store.get("a"), Some(1));
        assert_eq!(store.remove("a"), Some(1));
        assert_eq!(store.get("a"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut store = BoundedStore::new(2);
        store.insert("a", 1);
        store.insert("b", 2);
        // touch "a" so "b" becomes the eviction candidate
        store.get("a");
        let evicted = store.insert("c", 3);

        assert_eq!(evicted, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a"), Some(1));
        assert_eq!(store.get("b"), None);
        assert_eq!(store.get("c"), Some(3));
    }

    #[test]
    fn test_replace_does_not_evict() {
        let mut store = BoundedStore::new(2);
        store.insert("a", 1);
        store.insert("b", 2);
        assert_eq!(store.insert("a", 10), 0);
        assert_eq!(store.get("a"), Some(10));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut store = BoundedStore::with_ttl(4, Some(Duration::from_millis(0)));
        store.insert("a", 1);
        assert_eq!(store.get("a"), None);
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(
            capacity in 1usize..32,
            keys in proptest::collection::vec("[a-z]{1,3}", 0..200),
        ) {
            let mut store = BoundedStore::new(capacity);
            for (i, key) in keys.iter().enumerate() {
                store.insert(key, i);
                prop_assert!(store.len() <= capacity);
            }
        }
    }
}

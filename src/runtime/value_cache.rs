// src/runtime/value_cache.rs
//! Script-visible `cache` namespace
//!
//! Size-bounded, optionally time-bounded, and separate from the module and
//! service resolution caches.

use crate::runtime::bounded_store::BoundedStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;

pub struct ValueCache {
    store: Mutex<BoundedStore<Value>>,
}

impl ValueCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            store: Mutex::new(BoundedStore::with_ttl(capacity, ttl)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.lock().get(key)
    }

    /// Store `value`; `None` or JSON null deletes the key
    pub fn set(&self, key: &str, value: Option<Value>) {
        let mut store = self.store.lock();
        match value {
            Some(Value::Null) | None => {
                store.remove(key);
            }
            Some(value) => {
                store.insert(key, value);
            }
        }
    }

    pub fn invalidate_all(&self) {
        self.store.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

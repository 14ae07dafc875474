// src/runtime/shared_state.rs
//! Shared `app` and `system` namespaces
//!
//! Plain concurrent maps visible to every context of one runtime. Writing
//! `None` (or JSON null) deletes the key. There is no ordering between
//! concurrent writers.

use dashmap::DashMap;
use serde_json::Value;

/// One concurrent key/value namespace
#[derive(Debug, Default)]
pub struct SharedMap {
    entries: DashMap<String, Value>,
}

impl SharedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    /// Store `value` and return the previous one; `None` or null deletes
    pub fn set(&self, key: &str, value: Option<Value>) -> Option<Value> {
        match value {
            Some(Value::Null) | None => self.entries.remove(key).map(|(_, v)| v),
            Some(value) => self.entries.insert(key.to_string(), value),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Namespaces owned by one runtime instance
#[derive(Debug, Default)]
pub struct SharedState {
    pub app: SharedMap,
    pub system: SharedMap,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.app.clear();
        self.system.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.app.is_empty() && self.system.is_empty()
    }
}

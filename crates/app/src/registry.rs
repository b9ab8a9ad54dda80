//! Shared registry: one key/value map handed to every unit explicitly.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

/// Key/value store shared by all units of one daemon.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    entries: Mutex<HashMap<String, Value>>,
}

impl SharedRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Store `value`, returning the one it replaced.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_store_and_replace_values() {
        let registry = SharedRegistry::new();
        assert_eq!(registry.set("mode", json!("away")), None);
        assert_eq!(registry.set("mode", json!("home")), Some(json!("away")));
        assert_eq!(registry.get("mode"), Some(json!("home")));
        assert!(registry.contains("mode"));
    }

    #[test]
    fn should_remove_values() {
        let registry = SharedRegistry::new();
        registry.set("k", json!(1));
        assert_eq!(registry.remove("k"), Some(json!(1)));
        assert_eq!(registry.get("k"), None);
    }
}

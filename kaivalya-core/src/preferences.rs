use std::collections::HashMap;
use std::sync::RwLock;

use crate::{CoreError, CoreResult};

/// Durable client-side key/value storage (the browser's localStorage equivalent).
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> CoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> CoreResult<()>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: &str) -> Self {
        let store = Self::new();
        if let Ok(mut values) = store.values.write() {
            values.insert(key.to_string(), value.to_string());
        }
        store
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let values = self
            .values
            .read()
            .map_err(|_| CoreError::StorageError("preference lock poisoned".into()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| CoreError::StorageError("preference lock poisoned".into()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryPreferenceStore::new();
        assert_eq!(store.get("selectedCurrency").unwrap(), None);

        store.set("selectedCurrency", "INR").unwrap();
        assert_eq!(store.get("selectedCurrency").unwrap().as_deref(), Some("INR"));
    }
}

//! In-memory key-value store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::store::KeyValueStore;
use strongbox_common::{Error, Result};

/// In-memory key-value store.
///
/// Used for ephemeral sessions when no durable store is reachable, and for
/// testing. All data is lost on drop. An optional byte quota makes writes
/// fail the way a full browser-style store would.
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    quota: Option<usize>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            quota: None,
        }
    }

    /// Create a store that rejects writes once the total size of keys and
    /// values would exceed `quota` bytes.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            quota: Some(quota),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Check if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> Error {
        Error::Storage("Memory store lock poisoned".to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::StorageWrite("Memory store lock poisoned".to_string()))?;

        if let Some(quota) = self.quota {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(Error::StorageWrite(format!(
                    "Quota of {} bytes exceeded",
                    quota
                )));
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::StorageWrite("Memory store lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get() {
        let store = MemoryStore::new();

        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = MemoryStore::new();

        store.set("a", "1").await.unwrap();
        store.set("a", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = MemoryStore::new();

        store.set("a", "1").await.unwrap();
        store.remove("a").await.unwrap();
        store.remove("a").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_quota_rejects_write() {
        let store = MemoryStore::with_quota(10);

        store.set("k", "12345").await.unwrap();
        let result = store.set("other", "123456789").await;
        assert!(matches!(result, Err(Error::StorageWrite(_))));

        // Replacing an existing value only counts the new size.
        store.set("k", "123456789").await.unwrap();
        assert_eq!(store.get("other").await.unwrap(), None);
    }
}

//! In-memory storage backend
//!
//! Ephemeral key/value storage backed by DashMap. Clones share the same
//! underlying map, which makes it convenient for wiring one store into
//! several persisters or tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use stepwise_core::{FlowResult, StorageAdapter};

/// Lock-free in-memory storage
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn get(&self, key: &str) -> FlowResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> FlowResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> FlowResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> FlowResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_set_get_remove() {
        let storage = InMemoryStorage::new();
        storage.set("a", b"1".to_vec()).await.unwrap();

        assert_eq!(storage.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(storage.get("b").await.unwrap(), None);

        storage.remove("a").await.unwrap();
        assert!(storage.get("a").await.unwrap().is_none());

        // removing a missing key is fine
        storage.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_list_keys() {
        let storage = InMemoryStorage::new();
        storage.set("flow:a", vec![]).await.unwrap();
        storage.set("flow:a:t1", vec![]).await.unwrap();
        storage.set("other:a", vec![]).await.unwrap();

        let mut keys = storage.list_keys("flow:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["flow:a", "flow:a:t1"]);
        assert_eq!(storage.list_keys("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_memory_clones_share_entries() {
        let storage = InMemoryStorage::new();
        let other = storage.clone();
        storage.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other.keys(), vec!["k"]);
    }
}

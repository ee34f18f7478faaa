//! File-based storage backend for persistent flows
//!
//! Stores every key in a single JSON document that survives process
//! restarts. Values are kept as UTF-8 text, which is what the persister
//! writes (JSON-encoded records).

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use stepwise_core::{FlowError, FlowResult, StorageAdapter};
use tokio::sync::RwLock;

/// File-based storage
///
/// All entries are cached in memory and the whole document is rewritten on
/// every mutation, so the file always reflects the latest write.
///
/// ## Example
///
/// ```rust,no_run
/// use stepwise_store::FileStorage;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = FileStorage::new("./drafts/flows.json").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FileStorage {
    /// Path to the JSON file
    path: PathBuf,
    /// In-memory cache of entries
    cache: Arc<RwLock<BTreeMap<String, String>>>,
}

impl FileStorage {
    /// Open (or create) the store at `path`
    ///
    /// If the file exists, loads existing entries. Otherwise starts empty and
    /// creates the file on first write.
    pub async fn new(path: impl Into<PathBuf>) -> FlowResult<Self> {
        let path = path.into();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    FlowError::persistence(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let cache: BTreeMap<String, String> = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                FlowError::persistence(format!("Failed to read store file {}: {}", path.display(), e))
            })?;

            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    FlowError::persistence(format!(
                        "Failed to parse store file {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), entries = cache.len(), "Opened file storage");

        Ok(Self {
            path,
            cache: Arc::new(RwLock::new(cache)),
        })
    }

    /// Persist current cache to file
    async fn persist(&self) -> FlowResult<()> {
        let cache = self.cache.read().await;
        let content = serde_json::to_string_pretty(&*cache)?;
        drop(cache);

        tokio::fs::write(&self.path, content).await.map_err(|e| {
            FlowError::persistence(format!(
                "Failed to write store file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Get the file path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Get the number of entries
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Check if empty
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn get(&self, key: &str) -> FlowResult<Option<Vec<u8>>> {
        let cache = self.cache.read().await;
        Ok(cache.get(key).map(|v| v.clone().into_bytes()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> FlowResult<()> {
        let text = String::from_utf8(value).map_err(|_| {
            FlowError::persistence(format!("value for '{}' is not valid UTF-8", key))
        })?;
        {
            let mut cache = self.cache.write().await;
            cache.insert(key.to_string(), text);
        }
        self.persist().await
    }

    async fn remove(&self, key: &str) -> FlowResult<()> {
        let removed = {
            let mut cache = self.cache.write().await;
            cache.remove(key).is_some()
        };
        if removed {
            self.persist().await
        } else {
            Ok(())
        }
    }

    async fn list_keys(&self, prefix: &str) -> FlowResult<Vec<String>> {
        let cache = self.cache.read().await;
        Ok(cache
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_storage_set_get() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flows.json");

        let storage = FileStorage::new(&path).await.unwrap();
        storage.set("stepwise:onboarding", br#"{"a":1}"#.to_vec()).await.unwrap();

        let value = storage.get("stepwise:onboarding").await.unwrap();
        assert_eq!(value, Some(br#"{"a":1}"#.to_vec()));

        // Verify file was created
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_file_storage_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flows.json");

        {
            let storage = FileStorage::new(&path).await.unwrap();
            storage.set("k1", b"one".to_vec()).await.unwrap();
            storage.set("k2", b"two".to_vec()).await.unwrap();
        }

        // Reopen and verify data persisted
        {
            let storage = FileStorage::new(&path).await.unwrap();
            assert_eq!(storage.len().await, 2);
            assert_eq!(storage.get("k1").await.unwrap(), Some(b"one".to_vec()));
            assert_eq!(storage.get("k2").await.unwrap(), Some(b"two".to_vec()));
        }
    }

    #[tokio::test]
    async fn test_file_storage_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flows.json");

        let storage = FileStorage::new(&path).await.unwrap();
        storage.set("k1", b"1".to_vec()).await.unwrap();
        storage.remove("k1").await.unwrap();
        storage.remove("missing").await.unwrap();

        assert!(storage.get("k1").await.unwrap().is_none());

        let reopened = FileStorage::new(&path).await.unwrap();
        assert!(reopened.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_storage_list_keys() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("flows.json")).await.unwrap();

        storage.set("stepwise:tasks:t1", b"1".to_vec()).await.unwrap();
        storage.set("stepwise:tasks:t2", b"2".to_vec()).await.unwrap();
        storage.set("stepwise:survey", b"3".to_vec()).await.unwrap();

        let keys = storage.list_keys("stepwise:tasks").await.unwrap();
        assert_eq!(keys, vec!["stepwise:tasks:t1", "stepwise:tasks:t2"]);
        assert_eq!(storage.list_keys("stepwise:").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_file_storage_rejects_binary_values() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("flows.json")).await.unwrap();

        let err = storage.set("k", vec![0xff, 0xfe]).await.unwrap_err();
        assert!(matches!(err, FlowError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_file_storage_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/flows.json");

        let storage = FileStorage::new(&path).await.unwrap();
        storage.set("k", b"v".to_vec()).await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_file_storage_reports_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flows.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileStorage::new(&path).await.err().unwrap();
        assert!(matches!(err, FlowError::Persistence(_)));
    }
}

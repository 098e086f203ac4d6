//! Durable key-value storage
//!
//! The serial sequencer keeps its state behind [`KeyValueStore`] so the
//! backing store can be swapped: [`FileStore`] on a test station,
//! [`MemoryStore`] in tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Storage error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Existing store file could not be parsed
    #[error("Corrupt store file {path}: {source}")]
    Corrupt {
        /// Store file
        path: PathBuf,
        /// Parse failure
        #[source]
        source: serde_json::Error,
    },

    /// Store contents could not be encoded
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// String key-value store. Both operations complete (and `set` is durable)
/// before the returned future resolves.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a value
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with entries
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON-file backed store.
///
/// The whole map is rewritten on every `set`: it goes to a sibling temp file
/// first and is renamed over the store, so a crash leaves either the old or
/// the new contents on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        // Held across the write so concurrent sets land in order.
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(key.to_string(), value.to_string());

        if let Err(e) = self.persist(&entries).await {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::with_entries([("serial:DEV1", "124")]);

        assert_eq!(store.get("serial:DEV1").await.unwrap().as_deref(), Some("124"));
        assert_eq!(store.get("serial:DEV2").await.unwrap(), None);

        store.set("serial:DEV2", "7").await.unwrap();
        assert_eq!(store.get("serial:DEV2").await.unwrap().as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("serials.json");

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(store.get("serial:DEV1").await.unwrap(), None);
        store.set("serial:DEV1", "124").await.unwrap();
        store.set("serial:DEV1", "125").await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("serial:DEV1").await.unwrap().as_deref(), Some("125"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serials.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_file_store_empty_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serials.json");
        std::fs::write(&path, "").unwrap();

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(store.get("anything").await.unwrap(), None);
    }
}

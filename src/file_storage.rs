//! Durable JSON-file backend
//!
//! File format (v1):
//! ```json
//! { "version": 1, "entries": { "<key>": "<value>", ... } }
//! ```
//! Every mutation rewrites the whole file through a temporary sibling and an
//! atomic rename, so a crash leaves either the old or the new file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Result, SecureStoreError};
use crate::storage::KvBackend;

pub const FILE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// Unencrypted key-value backend persisted to a single JSON file
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Open the backend at `path`, loading existing entries if the file exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes).map_err(|e| {
                    SecureStoreError::Storage(format!("corrupt store file {}: {}", path.display(), e))
                })?;
                if file.version != FILE_FORMAT_VERSION {
                    return Err(SecureStoreError::Storage(format!(
                        "unsupported store file version {} in {}",
                        file.version,
                        path.display()
                    )));
                }
                file.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(SecureStoreError::Storage(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let file = StoreFile {
            version: FILE_FORMAT_VERSION,
            entries: entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(&bytes).await?;
        tmp.sync_all().await?;
        drop(tmp);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Apply `change` to a copy of the entries; commit it only if it persists
    async fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let mut guard = self.entries.lock().await;
        let mut next = guard.clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }
}

#[async_trait]
impl KvBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.mutate(|entries| entries.remove(key).is_some()).await
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        self.mutate(|entries| {
            let mut changed = false;
            for key in keys {
                changed |= entries.remove(key).is_some();
            }
            changed
        })
        .await
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let backend = FileBackend::open(&path).await.unwrap();
        backend.set("auth_token", "abc").await.unwrap();
        backend.set("theme", "dark").await.unwrap();
        backend.remove("theme").await.unwrap();
        drop(backend);

        let reopened = FileBackend::open(&path).await.unwrap();
        assert_eq!(reopened.path(), path.as_path());
        assert_eq!(reopened.get("auth_token").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(reopened.list_keys().await.unwrap(), vec!["auth_token".to_string()]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path().join("nested/store.json")).await.unwrap();
        assert!(backend.list_keys().await.unwrap().is_empty());

        backend.set("k", "v").await.unwrap();
        assert!(dir.path().join("nested/store.json").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"not json").unwrap();

        let result = FileBackend::open(&path).await;
        assert!(matches!(result, Err(SecureStoreError::Storage(_))));
    }

    #[tokio::test]
    async fn test_remove_many_persists_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let backend = FileBackend::open(&path).await.unwrap();
        for key in ["a", "b", "c"] {
            backend.set(key, "v").await.unwrap();
        }
        backend
            .remove_many(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        let reopened = FileBackend::open(&path).await.unwrap();
        assert_eq!(reopened.list_keys().await.unwrap(), vec!["c".to_string()]);
    }
}

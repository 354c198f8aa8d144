//! Storage abstraction for the secure store
//!
//! The store never persists anything itself; it talks to a plain,
//! unencrypted string key-value backend through [`KvBackend`]. Backends
//! know nothing about envelopes.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;

/// Durable string-keyed backend with enumerable keys
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write (or overwrite) a value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; deleting a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Delete several values in one call
    async fn remove_many(&self, keys: &[String]) -> Result<()>;

    /// List every key currently stored
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// In-memory implementation of KvBackend
///
/// Suitable for development, testing, and as the reference backend.
/// Data is lost when the process terminates.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored entry
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_backend() {
        let backend = InMemoryBackend::new();
        backend.set("auth_token", "abc").await.unwrap();
        backend.set("theme", "dark").await.unwrap();

        assert_eq!(backend.get("auth_token").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(backend.get("missing").await.unwrap(), None);

        let mut keys = backend.list_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["auth_token".to_string(), "theme".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let backend = InMemoryBackend::new();
        backend.set("k", "v").await.unwrap();
        backend.remove("k").await.unwrap();
        backend.remove("k").await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_remove_many() {
        let backend = InMemoryBackend::new();
        for key in ["a", "b", "c"] {
            backend.set(key, "v").await.unwrap();
        }
        backend
            .remove_many(&["a".to_string(), "c".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(backend.list_keys().await.unwrap(), vec!["b".to_string()]);
    }
}

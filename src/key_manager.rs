use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::{SecureKey, SecureRandom, AES_256_KEY_SIZE};
use crate::error::{Result, SecureStoreError};
use crate::storage::KvBackend;

/// The single current secret: raw bytes for the cipher, hex for the integrity tag
#[derive(Clone)]
pub struct KeyMaterial {
    key: SecureKey,
    hex: Zeroizing<String>,
}

impl KeyMaterial {
    /// Draw fresh key material from the CSPRNG
    pub fn generate(random: &dyn SecureRandom) -> Result<Self> {
        if !random.is_available() {
            return Err(SecureStoreError::Initialization(
                "secure random source unavailable".into(),
            ));
        }
        Self::from_bytes(random.random_bytes(AES_256_KEY_SIZE)?)
            .map_err(|e| SecureStoreError::Initialization(e.to_string()))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != AES_256_KEY_SIZE {
            return Err(SecureStoreError::Crypto(format!(
                "Invalid key size: expected {}, got {}",
                AES_256_KEY_SIZE,
                bytes.len()
            )));
        }
        let hex = Zeroizing::new(hex::encode(&bytes));
        Ok(Self {
            key: SecureKey::new(bytes),
            hex,
        })
    }

    /// Parse the persisted form
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| SecureStoreError::Crypto(format!("key material is not hex: {}", e)))?;
        Self::from_bytes(bytes)
    }

    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    pub fn secure_key(&self) -> &SecureKey {
        &self.key
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial([REDACTED])")
    }
}

/// Key Manager: owns load, generation, caching and forgetting of the key material
pub struct KeyManager<B: KvBackend> {
    storage: Arc<B>,
    random: Arc<dyn SecureRandom>,
    storage_key: String,
    current: RwLock<Option<Arc<KeyMaterial>>>,
    // Serializes check-then-generate so concurrent first callers share one key.
    init_lock: Mutex<()>,
}

impl<B: KvBackend> KeyManager<B> {
    pub fn new(storage: Arc<B>, random: Arc<dyn SecureRandom>, storage_key: impl Into<String>) -> Self {
        Self {
            storage,
            random,
            storage_key: storage_key.into(),
            current: RwLock::new(None),
            init_lock: Mutex::new(()),
        }
    }

    /// Start with caller-supplied key material already cached (not persisted)
    pub fn with_key(
        storage: Arc<B>,
        random: Arc<dyn SecureRandom>,
        storage_key: impl Into<String>,
        material: KeyMaterial,
    ) -> Self {
        let manager = Self::new(storage, random, storage_key);
        Self {
            current: RwLock::new(Some(Arc::new(material))),
            ..manager
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Cached key, without touching the backend
    pub async fn current(&self) -> Option<Arc<KeyMaterial>> {
        self.current.read().await.clone()
    }

    /// Return the current key, loading or creating it on first use
    pub async fn ensure_key(&self) -> Result<Arc<KeyMaterial>> {
        if let Some(key) = self.current().await {
            return Ok(key);
        }

        let _guard = self.init_lock.lock().await;
        if let Some(key) = self.current().await {
            return Ok(key);
        }

        let material = match self.storage.get(&self.storage_key).await? {
            Some(stored) => match KeyMaterial::from_hex(&stored) {
                Ok(material) => {
                    debug!(key = %self.storage_key, "loaded key material");
                    material
                }
                Err(err) => {
                    warn!(key = %self.storage_key, error = %err, "stored key material is malformed, regenerating");
                    self.generate_and_persist().await?
                }
            },
            None => self.generate_and_persist().await?,
        };

        let material = Arc::new(material);
        *self.current.write().await = Some(Arc::clone(&material));
        Ok(material)
    }

    async fn generate_and_persist(&self) -> Result<KeyMaterial> {
        let material = KeyMaterial::generate(self.random.as_ref())?;
        self.storage
            .set(&self.storage_key, material.as_hex())
            .await
            .map_err(|e| match e {
                SecureStoreError::Storage(msg) => {
                    SecureStoreError::Storage(format!("persist key material: {}", msg))
                }
                other => other,
            })?;
        debug!(key = %self.storage_key, "generated new key material");
        Ok(material)
    }

    /// Drop the cached key; the next `ensure_key` goes back to the backend
    pub async fn forget(&self) {
        let _guard = self.init_lock.lock().await;
        *self.current.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::OsRandom;
    use crate::storage::InMemoryBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const KEY_NAME: &str = "@encryption_key";

    fn manager(backend: Arc<InMemoryBackend>) -> KeyManager<InMemoryBackend> {
        KeyManager::new(backend, Arc::new(OsRandom), KEY_NAME)
    }

    /// Backend whose writes can be switched off, counting reads
    #[derive(Default)]
    struct FlakyBackend {
        inner: InMemoryBackend,
        fail_writes: AtomicBool,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl KvBackend for FlakyBackend {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(SecureStoreError::Storage("disk full".into()));
            }
            self.inner.set(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }
        async fn remove_many(&self, keys: &[String]) -> Result<()> {
            self.inner.remove_many(keys).await
        }
        async fn list_keys(&self) -> Result<Vec<String>> {
            self.inner.list_keys().await
        }
    }

    struct NoRandom;

    impl SecureRandom for NoRandom {
        fn random_bytes(&self, _len: usize) -> Result<Vec<u8>> {
            Err(SecureStoreError::Initialization("no entropy".into()))
        }
        fn is_available(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_generates_and_persists_hex_key() {
        let backend = Arc::new(InMemoryBackend::new());
        let key = manager(Arc::clone(&backend)).ensure_key().await.unwrap();

        let stored = backend.snapshot().get(KEY_NAME).cloned().unwrap();
        assert_eq!(stored.len(), AES_256_KEY_SIZE * 2);
        assert_eq!(stored, key.as_hex());
    }

    #[tokio::test]
    async fn test_reuses_persisted_key_across_managers() {
        let backend = Arc::new(InMemoryBackend::new());
        let first = manager(Arc::clone(&backend)).ensure_key().await.unwrap();
        let second = manager(Arc::clone(&backend)).ensure_key().await.unwrap();
        assert_eq!(first.as_hex(), second.as_hex());
    }

    #[tokio::test]
    async fn test_cached_key_skips_backend() {
        let backend = Arc::new(FlakyBackend::default());
        let keys = KeyManager::new(Arc::clone(&backend), Arc::new(OsRandom), KEY_NAME);
        keys.ensure_key().await.unwrap();
        let reads = backend.reads.load(Ordering::SeqCst);
        keys.ensure_key().await.unwrap();
        keys.ensure_key().await.unwrap();
        assert_eq!(backend.reads.load(Ordering::SeqCst), reads);
    }

    #[tokio::test]
    async fn test_failed_write_is_not_cached() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_writes.store(true, Ordering::SeqCst);
        let keys = KeyManager::new(Arc::clone(&backend), Arc::new(OsRandom), KEY_NAME);

        let result = keys.ensure_key().await;
        assert!(matches!(result, Err(SecureStoreError::Storage(_))));
        assert!(keys.current().await.is_none());

        backend.fail_writes.store(false, Ordering::SeqCst);
        let key = keys.ensure_key().await.unwrap();
        assert_eq!(
            backend.inner.snapshot().get(KEY_NAME).map(String::as_str),
            Some(key.as_hex())
        );
    }

    #[tokio::test]
    async fn test_malformed_stored_key_is_replaced() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.set(KEY_NAME, "not-hex").await.unwrap();

        let key = manager(Arc::clone(&backend)).ensure_key().await.unwrap();
        assert_eq!(backend.snapshot().get(KEY_NAME).map(String::as_str), Some(key.as_hex()));
    }

    #[tokio::test]
    async fn test_unavailable_random_is_initialization_error() {
        let backend = Arc::new(InMemoryBackend::new());
        let keys = KeyManager::new(Arc::clone(&backend), Arc::new(NoRandom), KEY_NAME);
        let result = keys.ensure_key().await;
        assert!(matches!(result, Err(SecureStoreError::Initialization(_))));
        assert!(backend.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_calls_share_one_key() {
        let backend = Arc::new(InMemoryBackend::new());
        let keys = Arc::new(manager(Arc::clone(&backend)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let keys = Arc::clone(&keys);
                tokio::spawn(async move { keys.ensure_key().await.unwrap().as_hex().to_string() })
            })
            .collect();

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.dedup();
        assert_eq!(seen.len(), 1);
        assert_eq!(backend.snapshot().get(KEY_NAME), Some(&seen[0]));
    }

    #[tokio::test]
    async fn test_forget_then_ensure_reloads_from_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let keys = manager(Arc::clone(&backend));
        let before = keys.ensure_key().await.unwrap();

        keys.forget().await;
        assert!(keys.current().await.is_none());
        assert_eq!(keys.ensure_key().await.unwrap().as_hex(), before.as_hex());

        keys.forget().await;
        backend.remove(KEY_NAME).await.unwrap();
        assert_ne!(keys.ensure_key().await.unwrap().as_hex(), before.as_hex());
    }

    #[tokio::test]
    async fn test_injected_key_is_used_without_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let material = KeyMaterial::from_bytes(vec![9u8; AES_256_KEY_SIZE]).unwrap();
        let keys = KeyManager::with_key(Arc::clone(&backend), Arc::new(OsRandom), KEY_NAME, material);

        assert_eq!(keys.ensure_key().await.unwrap().as_hex(), "09".repeat(32));
        assert!(backend.is_empty());
    }

    #[test]
    fn test_key_material_rejects_wrong_length() {
        assert!(KeyMaterial::from_hex("abcd").is_err());
        assert!(KeyMaterial::from_bytes(vec![0u8; 31]).is_err());
        assert_eq!(format!("{:?}", KeyMaterial::from_bytes(vec![0u8; 32]).unwrap()), "KeyMaterial([REDACTED])");
    }
}

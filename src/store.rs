//! Secure store facade
//!
//! Wraps a plain [`KvBackend`] so that values are written as sealed
//! envelopes and read back only while they verify and have not expired.
//! Anything that fails to read is removed from the backend.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{InitOptions, SecureStoreConfig};
use crate::crypto::{DigestPrimitive, OsRandom, SecureRandom, Sha256Digest};
use crate::envelope::{Decoded, Envelope, EnvelopeCodec};
use crate::error::{Result, SecureStoreError};
use crate::key_manager::{KeyManager, KeyMaterial};
use crate::migration::{MigrationEngine, MigrationReport};
use crate::storage::KvBackend;

/// Why a stored value could not be returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Tag mismatch or payload failed authentication
    Integrity,
    Expired,
    /// Backend or key failure while reading
    Unreadable(String),
}

/// Outcome of [`SecureStore::get_entry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(String),
    NotFound,
    /// The entry existed but was discarded
    Invalid(InvalidReason),
}

impl Lookup {
    pub fn into_option(self) -> Option<String> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound | Lookup::Invalid(_) => None,
        }
    }
}

/// Encrypted, expiring, tamper-evident view of a key-value backend
pub struct SecureStore<B: KvBackend> {
    backend: Arc<B>,
    keys: KeyManager<B>,
    codec: EnvelopeCodec,
    random: Arc<dyn SecureRandom>,
    config: SecureStoreConfig,
}

impl<B: KvBackend> SecureStore<B> {
    /// Store with default configuration and collaborators
    pub fn new(backend: Arc<B>) -> Self {
        Self::builder(backend).build()
    }

    pub fn builder(backend: Arc<B>) -> SecureStoreBuilder<B> {
        SecureStoreBuilder::new(backend)
    }

    pub fn key_manager(&self) -> &KeyManager<B> {
        &self.keys
    }

    /// Ensure key material exists, then optionally migrate legacy entries
    pub async fn initialize(&self, options: InitOptions) -> Result<Option<MigrationReport>> {
        self.keys.ensure_key().await?;

        if !options.enable_migration {
            return Ok(None);
        }

        let engine = MigrationEngine::new(Arc::clone(&self.config.migration_filter));
        match engine.run(self).await {
            Ok(report) => Ok(Some(report)),
            Err(err) => {
                warn!(error = %err, "legacy migration skipped");
                Ok(None)
            }
        }
    }

    /// Seal `value` and write it under `key`
    pub async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let material = self.keys.ensure_key().await?;
        let envelope = self.codec.encode(value, &material)?;
        self.backend.set(key, &envelope).await
    }

    /// Read `key`, discarding the entry if it cannot be returned
    pub async fn get_entry(&self, key: &str) -> Lookup {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::NotFound,
            Err(err) => return self.discard(key, err).await,
        };

        match self.classify(&raw).await {
            Ok(decoded) => Lookup::Found(decoded.into_inner()),
            Err(err) => self.discard(key, err).await,
        }
    }

    /// `Some(value)` only for readable entries
    pub async fn get_item(&self, key: &str) -> Option<String> {
        self.get_entry(key).await.into_option()
    }

    pub async fn remove_item(&self, key: &str) -> Result<()> {
        self.backend.remove(key).await
    }

    /// Remove every purge-selected entry and the key material, then forget the key
    pub async fn clear_all(&self) -> Result<usize> {
        let reserved = self.key_storage_key();
        let mut doomed: Vec<String> = self
            .backend
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| key == reserved || self.config.purge_filter.matches(key))
            .collect();
        let removed = doomed.len();
        if !doomed.iter().any(|key| key == reserved) {
            doomed.push(reserved.to_string());
        }

        self.backend.remove_many(&doomed).await?;
        self.keys.forget().await;
        info!(removed, "cleared secure storage");
        Ok(removed)
    }

    /// True when the random source can produce key material
    pub fn is_available(&self) -> bool {
        self.random.is_available()
    }

    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn key_storage_key(&self) -> &str {
        self.keys.storage_key()
    }

    /// Decode a raw backend value; only envelopes need the key
    pub(crate) async fn classify(&self, raw: &str) -> Result<Decoded> {
        let envelope = match Envelope::parse(raw) {
            Some(envelope) => envelope,
            None => return Ok(Decoded::Legacy(raw.to_string())),
        };
        let material = self.keys.ensure_key().await?;
        self.codec.open(&envelope, &material).map(Decoded::Protected)
    }

    async fn discard(&self, key: &str, err: SecureStoreError) -> Lookup {
        let reason = match &err {
            SecureStoreError::Integrity(_) => InvalidReason::Integrity,
            SecureStoreError::Expired { .. } => InvalidReason::Expired,
            other => InvalidReason::Unreadable(other.to_string()),
        };
        warn!(key = %key, error = %err, "discarding unreadable entry");

        if let Err(cleanup) = self.backend.remove(key).await {
            debug!(key = %key, error = %cleanup, "cleanup of unreadable entry failed");
        }
        Lookup::Invalid(reason)
    }
}

/// Wires collaborators for a [`SecureStore`]
pub struct SecureStoreBuilder<B: KvBackend> {
    backend: Arc<B>,
    config: SecureStoreConfig,
    random: Arc<dyn SecureRandom>,
    digest: Option<Arc<dyn DigestPrimitive>>,
    clock: Arc<dyn Clock>,
    key_material: Option<KeyMaterial>,
}

impl<B: KvBackend> SecureStoreBuilder<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            config: SecureStoreConfig::default(),
            random: Arc::new(OsRandom),
            digest: Some(Arc::new(Sha256Digest)),
            clock: Arc::new(SystemClock),
            key_material: None,
        }
    }

    pub fn with_config(mut self, config: SecureStoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_random(mut self, random: Arc<dyn SecureRandom>) -> Self {
        self.random = random;
        self
    }

    pub fn with_digest(mut self, digest: Arc<dyn DigestPrimitive>) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Fall back to the rolling hash for integrity tags
    pub fn without_digest(mut self) -> Self {
        self.digest = None;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use this key instead of loading or generating one; it is not persisted
    pub fn with_key_material(mut self, material: KeyMaterial) -> Self {
        self.key_material = Some(material);
        self
    }

    pub fn build(self) -> SecureStore<B> {
        let storage_key = self.config.key_storage_key.clone();
        let keys = match self.key_material {
            Some(material) => KeyManager::with_key(
                Arc::clone(&self.backend),
                Arc::clone(&self.random),
                storage_key,
                material,
            ),
            None => KeyManager::new(Arc::clone(&self.backend), Arc::clone(&self.random), storage_key),
        };
        let codec = EnvelopeCodec::new(
            Arc::clone(&self.random),
            self.digest,
            self.clock,
            self.config.max_data_age,
        );

        SecureStore {
            backend: self.backend,
            keys,
            codec,
            random: self.random,
            config: self.config,
        }
    }
}

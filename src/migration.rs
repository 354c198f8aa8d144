//! One-time re-wrapping of legacy plaintext entries

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::envelope::Decoded;
use crate::error::{Result, SecureStoreError};
use crate::storage::KvBackend;
use crate::store::SecureStore;

/// Decides whether a backend key name is selected
pub trait KeyFilter: Send + Sync {
    fn matches(&self, key: &str) -> bool;
}

impl<F> KeyFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, key: &str) -> bool {
        self(key)
    }
}

/// Matches key names containing any of the given fragments (case-sensitive)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstringFilter {
    fragments: Vec<String>,
}

impl SubstringFilter {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
        }
    }
}

impl KeyFilter for SubstringFilter {
    fn matches(&self, key: &str) -> bool {
        self.fragments.iter().any(|fragment| key.contains(fragment.as_str()))
    }
}

/// Counters for one migration pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Keys returned by the backend
    pub scanned: usize,
    /// Keys selected by the filter
    pub candidates: usize,
    pub migrated: usize,
    pub already_protected: usize,
    /// Envelopes that failed verification; left for `get_item` to purge
    pub invalid: usize,
    pub failed: usize,
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned {}, candidates {}, migrated {}, already protected {}, invalid {}, failed {}",
            self.scanned, self.candidates, self.migrated, self.already_protected, self.invalid, self.failed
        )
    }
}

enum Outcome {
    Migrated,
    AlreadyProtected,
    Invalid(SecureStoreError),
    Vanished,
}

/// Walks the backend and re-wraps selected legacy entries through the store
pub struct MigrationEngine {
    filter: Arc<dyn KeyFilter>,
}

impl MigrationEngine {
    pub fn new(filter: Arc<dyn KeyFilter>) -> Self {
        Self { filter }
    }

    /// Run one pass. Only a failure to list keys aborts the pass.
    pub async fn run<B: KvBackend>(&self, store: &SecureStore<B>) -> Result<MigrationReport> {
        let keys = store.backend().list_keys().await?;
        let mut report = MigrationReport {
            scanned: keys.len(),
            ..MigrationReport::default()
        };

        for key in keys {
            if key == store.key_storage_key() || !self.filter.matches(&key) {
                continue;
            }
            report.candidates += 1;

            match self.migrate_entry(store, &key).await {
                Ok(Outcome::Migrated) => {
                    info!(key = %key, "migrated legacy entry");
                    report.migrated += 1;
                }
                Ok(Outcome::AlreadyProtected) => report.already_protected += 1,
                Ok(Outcome::Invalid(err)) => {
                    warn!(key = %key, error = %err, "skipping envelope that fails verification");
                    report.invalid += 1;
                }
                Ok(Outcome::Vanished) => {}
                Err(err) => {
                    warn!(key = %key, error = %err, "failed to migrate entry");
                    report.failed += 1;
                }
            }
        }

        info!(%report, "legacy migration finished");
        Ok(report)
    }

    async fn migrate_entry<B: KvBackend>(&self, store: &SecureStore<B>, key: &str) -> Result<Outcome> {
        let raw = match store.backend().get(key).await? {
            Some(raw) => raw,
            None => return Ok(Outcome::Vanished),
        };

        match store.classify(&raw).await {
            Ok(Decoded::Protected(_)) => Ok(Outcome::AlreadyProtected),
            Ok(Decoded::Legacy(plaintext)) => {
                store.set_item(key, &plaintext).await?;
                Ok(Outcome::Migrated)
            }
            Err(err @ SecureStoreError::Integrity(_)) | Err(err @ SecureStoreError::Expired { .. }) => {
                Ok(Outcome::Invalid(err))
            }
            Err(err) => Err(err),
        }
    }
}

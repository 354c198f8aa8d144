use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SecureStoreError};
use crate::migration::{KeyFilter, SubstringFilter};

/// Reserved backend name holding the hex-encoded key material
pub const DEFAULT_KEY_STORAGE_KEY: &str = "@encryption_key";

/// Maximum envelope age before it reads as expired (24 hours)
pub const DEFAULT_MAX_DATA_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Key-name fragments that mark an entry as sensitive for migration
pub const MIGRATION_KEY_MARKERS: [&str; 4] = ["token", "auth", "password", "secret"];

/// Key-name fragments removed by `clear_all`
pub const PURGE_KEY_MARKERS: [&str; 3] = ["auth_", "encryption", "secure"];

pub const ENV_KEY_NAME: &str = "SECURE_STORE_KEY_NAME";
pub const ENV_MAX_AGE_SECS: &str = "SECURE_STORE_MAX_AGE_SECS";

/// Configuration for the secure store
#[derive(Clone)]
pub struct SecureStoreConfig {
    /// Backend name under which key material is persisted
    pub key_storage_key: String,
    /// Envelopes older than this are rejected as expired
    pub max_data_age: Duration,
    /// Selects legacy entries worth re-wrapping
    pub migration_filter: Arc<dyn KeyFilter>,
    /// Selects entries removed by `clear_all`
    pub purge_filter: Arc<dyn KeyFilter>,
}

impl Default for SecureStoreConfig {
    fn default() -> Self {
        Self {
            key_storage_key: DEFAULT_KEY_STORAGE_KEY.to_string(),
            max_data_age: DEFAULT_MAX_DATA_AGE,
            migration_filter: Arc::new(SubstringFilter::new(MIGRATION_KEY_MARKERS)),
            purge_filter: Arc::new(SubstringFilter::new(PURGE_KEY_MARKERS)),
        }
    }
}

impl std::fmt::Debug for SecureStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStoreConfig")
            .field("key_storage_key", &self.key_storage_key)
            .field("max_data_age", &self.max_data_age)
            .finish_non_exhaustive()
    }
}

impl SecureStoreConfig {
    /// Defaults overridden by `SECURE_STORE_*` variables, after loading `.env` if present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_KEY_NAME) {
            let name = name.trim();
            if name.is_empty() {
                return Err(SecureStoreError::Config(format!("{} must not be empty", ENV_KEY_NAME)));
            }
            config.key_storage_key = name.to_string();
        }

        if let Some(secs) = lookup(ENV_MAX_AGE_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|e| {
                SecureStoreError::Config(format!("Invalid {}: {}", ENV_MAX_AGE_SECS, e))
            })?;
            config.max_data_age = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_key_storage_key(mut self, name: impl Into<String>) -> Self {
        self.key_storage_key = name.into();
        self
    }

    pub fn with_max_data_age(mut self, max_age: Duration) -> Self {
        self.max_data_age = max_age;
        self
    }

    pub fn with_migration_filter(mut self, filter: impl KeyFilter + 'static) -> Self {
        self.migration_filter = Arc::new(filter);
        self
    }

    pub fn with_purge_filter(mut self, filter: impl KeyFilter + 'static) -> Self {
        self.purge_filter = Arc::new(filter);
        self
    }
}

/// Options for [`crate::SecureStore::initialize`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitOptions {
    /// Re-wrap sensitive legacy plaintext entries after the key is ready
    pub enable_migration: bool,
}

impl InitOptions {
    pub fn with_migration() -> Self {
        Self {
            enable_migration: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SecureStoreConfig::default();
        assert_eq!(config.key_storage_key, "@encryption_key");
        assert_eq!(config.max_data_age, Duration::from_secs(86_400));
        assert!(config.migration_filter.matches("auth_session"));
        assert!(config.migration_filter.matches("refresh_token"));
        assert!(!config.migration_filter.matches("theme"));
        assert!(config.purge_filter.matches("@encryption_key"));
        assert!(config.purge_filter.matches("secure_prefs"));
        assert!(!config.purge_filter.matches("refresh_token"));
    }

    #[test]
    fn test_env_overrides() {
        let config = SecureStoreConfig::from_lookup(lookup(&[
            (ENV_KEY_NAME, "app.key"),
            (ENV_MAX_AGE_SECS, "60"),
        ]))
        .unwrap();
        assert_eq!(config.key_storage_key, "app.key");
        assert_eq!(config.max_data_age, Duration::from_secs(60));
    }

    #[test]
    fn test_malformed_env_is_config_error() {
        let result = SecureStoreConfig::from_lookup(lookup(&[(ENV_MAX_AGE_SECS, "a day")]));
        assert!(matches!(result, Err(SecureStoreError::Config(_))));

        let result = SecureStoreConfig::from_lookup(lookup(&[(ENV_KEY_NAME, "  ")]));
        assert!(matches!(result, Err(SecureStoreError::Config(_))));
    }
}

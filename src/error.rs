//! Error types for the secure storage layer

use thiserror::Error;

/// Result type alias for secure storage operations
pub type Result<T> = std::result::Result<T, SecureStoreError>;

/// Errors that can occur while reading, writing or initializing the store
#[derive(Error, Debug)]
pub enum SecureStoreError {
    /// Backend read, write or remove failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Recomputed integrity tag did not match, or the sealed payload failed authentication
    #[error("Data integrity error: {0}")]
    Integrity(String),

    /// Envelope is older than the configured maximum age
    #[error("Data expired: age {age_ms}ms exceeds maximum {max_age_ms}ms")]
    Expired { age_ms: i64, max_age_ms: i64 },

    /// Key material could not be produced (CSPRNG unavailable or failed)
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Cipher misuse, e.g. a key of the wrong size
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for SecureStoreError {
    fn from(err: serde_json::Error) -> Self {
        SecureStoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SecureStoreError {
    fn from(err: std::io::Error) -> Self {
        SecureStoreError::Storage(err.to_string())
    }
}

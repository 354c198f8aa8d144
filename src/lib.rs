pub mod clock;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod key_manager;
pub mod migration;
pub mod storage;
pub mod store;

// Durable backend
pub mod file_storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{InitOptions, SecureStoreConfig, DEFAULT_KEY_STORAGE_KEY, DEFAULT_MAX_DATA_AGE};
pub use crypto::{AesGcmCipher, DigestPrimitive, OsRandom, SecureKey, SecureRandom, Sha256Digest, AES_256_KEY_SIZE};
pub use envelope::{Decoded, Envelope, EnvelopeCodec};
pub use error::{Result, SecureStoreError};
pub use key_manager::{KeyManager, KeyMaterial};
pub use migration::{KeyFilter, MigrationEngine, MigrationReport, SubstringFilter};
pub use storage::{InMemoryBackend, KvBackend};
pub use store::{InvalidReason, Lookup, SecureStore, SecureStoreBuilder};

pub use file_storage::FileBackend;

/// Common imports for store users
pub mod prelude {
    pub use crate::config::{InitOptions, SecureStoreConfig};
    pub use crate::error::{Result, SecureStoreError};
    pub use crate::file_storage::FileBackend;
    pub use crate::migration::{KeyFilter, SubstringFilter};
    pub use crate::storage::{InMemoryBackend, KvBackend};
    pub use crate::store::{Lookup, SecureStore};
}

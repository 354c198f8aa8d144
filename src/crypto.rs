//! Cryptographic primitives for the secure store
//!
//! This module provides the AES-256-GCM payload cipher, the key wrapper, and
//! the two collaborator seams the store depends on: a CSPRNG and a digest.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, SecureStoreError};

/// AES-256 key size in bytes (256 bits)
pub const AES_256_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Per-write salt size in bytes
pub const SALT_SIZE: usize = 16;

/// A secure key wrapper that zeroizes memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey {
    bytes: Vec<u8>,
}

impl SecureKey {
    /// Create a new SecureKey from raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Get the key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the key length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the key is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureKey([REDACTED])")
    }
}

/// Sealed payload: nonce plus ciphertext (auth tag appended)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    pub fn new(nonce: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self { nonce, ciphertext }
    }

    /// Encode as `base64(nonce || ciphertext)`
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let combined = [self.nonce.as_slice(), self.ciphertext.as_slice()].concat();
        STANDARD.encode(combined)
    }

    /// Decode from base64
    pub fn from_base64(encoded: &str) -> Result<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|e| SecureStoreError::Integrity(format!("payload is not base64: {}", e)))?;

        if decoded.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SecureStoreError::Integrity("payload too short".into()));
        }

        let (nonce, ciphertext) = decoded.split_at(NONCE_SIZE);
        Ok(Self {
            nonce: nonce.to_vec(),
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// AES-256-GCM cipher wrapper
pub struct AesGcmCipher;

impl AesGcmCipher {
    /// Encrypt plaintext using AES-256-GCM
    ///
    /// # Arguments
    /// * `key` - The 256-bit encryption key
    /// * `nonce` - 12 fresh random bytes, never reused under the same key
    /// * `plaintext` - The data to encrypt
    /// * `aad` - Additional authenticated data bound to the ciphertext
    pub fn encrypt(
        key: &SecureKey,
        nonce: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<EncryptedData> {
        let cipher = Self::cipher(key)?;

        if nonce.len() != NONCE_SIZE {
            return Err(SecureStoreError::Crypto(format!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce.len()
            )));
        }

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|e| SecureStoreError::Crypto(format!("Encryption error: {}", e)))?;

        Ok(EncryptedData::new(nonce.to_vec(), ciphertext))
    }

    /// Decrypt ciphertext using AES-256-GCM
    ///
    /// Authentication failure (wrong key, altered ciphertext or AAD) is an
    /// integrity error, not a crypto error.
    pub fn decrypt(key: &SecureKey, encrypted: &EncryptedData, aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = Self::cipher(key)?;

        if encrypted.nonce.len() != NONCE_SIZE {
            return Err(SecureStoreError::Integrity(format!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                encrypted.nonce.len()
            )));
        }

        cipher
            .decrypt(
                Nonce::from_slice(&encrypted.nonce),
                Payload {
                    msg: &encrypted.ciphertext,
                    aad,
                },
            )
            .map_err(|_| SecureStoreError::Integrity("payload authentication failed".into()))
    }

    fn cipher(key: &SecureKey) -> Result<Aes256Gcm> {
        if key.len() != AES_256_KEY_SIZE {
            return Err(SecureStoreError::Crypto(format!(
                "Invalid key size: expected {}, got {}",
                AES_256_KEY_SIZE,
                key.len()
            )));
        }
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| SecureStoreError::Crypto(format!("Cipher init error: {}", e)))
    }
}

/// Source of cryptographically secure random bytes
pub trait SecureRandom: Send + Sync {
    /// Draw `len` random bytes
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>>;

    /// Whether this source can currently produce bytes
    fn is_available(&self) -> bool;
}

/// Operating-system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl SecureRandom for OsRandom {
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| SecureStoreError::Initialization(format!("OS random source failed: {}", e)))?;
        Ok(bytes)
    }

    fn is_available(&self) -> bool {
        let mut probe = [0u8; 1];
        OsRng.try_fill_bytes(&mut probe).is_ok()
    }
}

/// One-way digest over text, hex output
pub trait DigestPrimitive: Send + Sync {
    fn sha256_hex(&self, input: &str) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Digest;

impl DigestPrimitive for Sha256Digest {
    fn sha256_hex(&self, input: &str) -> String {
        hex::encode(Sha256::digest(input.as_bytes()))
    }
}

/// Non-cryptographic fallback used when no digest primitive is configured.
///
/// 32-bit `h = h * 31 + c` over UTF-16 code units, rendered as the lowercase
/// hex of `|h|`. Weak: it only catches accidental corruption.
pub fn rolling_hash(input: &str) -> String {
    let hash = input.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    });
    format!("{:x}", i64::from(hash).abs())
}

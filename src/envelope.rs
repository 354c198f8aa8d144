//! Envelope codec
//!
//! An envelope string is `base64(json)` where the JSON object is
//!
//! ```json
//! { "payload": "...", "salt": "12,250,3,...", "integrityTag": "...", "createdAt": 1700000000000 }
//! ```
//!
//! * `payload` is `base64(nonce || AES-256-GCM ciphertext)`, with the salt and
//!   `createdAt` bound as additional authenticated data.
//! * `integrityTag` is the digest of `payload || keyHex || salt`.
//! * Anything that does not parse into this shape is a legacy plaintext value.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::clock::{duration_millis, Clock};
use crate::crypto::{rolling_hash, AesGcmCipher, DigestPrimitive, EncryptedData, SecureRandom, NONCE_SIZE, SALT_SIZE};
use crate::error::{Result, SecureStoreError};
use crate::key_manager::KeyMaterial;

/// Persisted form of a protected value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub payload: String,
    #[serde(default)]
    pub salt: String,
    pub integrity_tag: String,
    pub created_at: i64,
}

impl Envelope {
    /// Outer text-safe encoding
    pub fn to_envelope_string(&self) -> Result<String> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    /// `None` when `raw` is not an envelope (legacy plaintext)
    pub fn parse(raw: &str) -> Option<Self> {
        let bytes = STANDARD.decode(raw).ok()?;
        let envelope: Envelope = serde_json::from_slice(&bytes).ok()?;
        if envelope.payload.is_empty() || envelope.integrity_tag.is_empty() {
            return None;
        }
        Some(envelope)
    }

    fn aad(&self) -> Vec<u8> {
        format!("{}|{}", self.salt, self.created_at).into_bytes()
    }
}

/// Result of decoding a stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Verified, unexpired envelope
    Protected(String),
    /// Not an envelope; returned verbatim
    Legacy(String),
}

impl Decoded {
    pub fn into_inner(self) -> String {
        match self {
            Decoded::Protected(value) | Decoded::Legacy(value) => value,
        }
    }
}

/// Seals plaintext into envelopes and opens them again
pub struct EnvelopeCodec {
    random: Arc<dyn SecureRandom>,
    digest: Option<Arc<dyn DigestPrimitive>>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
}

impl EnvelopeCodec {
    pub fn new(
        random: Arc<dyn SecureRandom>,
        digest: Option<Arc<dyn DigestPrimitive>>,
        clock: Arc<dyn Clock>,
        max_age: Duration,
    ) -> Self {
        Self {
            random,
            digest,
            clock,
            max_age,
        }
    }

    /// Build the envelope for `plaintext`, stamped with the current time
    pub fn seal(&self, plaintext: &str, key: &KeyMaterial) -> Result<Envelope> {
        let salt = salt_list(&self.random.random_bytes(SALT_SIZE)?);
        let nonce = self.random.random_bytes(NONCE_SIZE)?;
        let created_at = self.clock.now_millis();

        let mut envelope = Envelope {
            payload: String::new(),
            salt,
            integrity_tag: String::new(),
            created_at,
        };
        envelope.payload =
            AesGcmCipher::encrypt(key.secure_key(), &nonce, plaintext.as_bytes(), &envelope.aad())?
                .to_base64();
        envelope.integrity_tag = self.integrity_tag(&envelope.payload, key, &envelope.salt);
        Ok(envelope)
    }

    /// Encode `plaintext` into an envelope string
    pub fn encode(&self, plaintext: &str, key: &KeyMaterial) -> Result<String> {
        self.seal(plaintext, key)?.to_envelope_string()
    }

    /// Decode a stored value; non-envelopes come back as `Legacy`
    pub fn decode(&self, raw: &str, key: &KeyMaterial) -> Result<Decoded> {
        match Envelope::parse(raw) {
            Some(envelope) => self.open(&envelope, key).map(Decoded::Protected),
            None => Ok(Decoded::Legacy(raw.to_string())),
        }
    }

    /// Verify tag, then age, then decrypt the payload
    pub fn open(&self, envelope: &Envelope, key: &KeyMaterial) -> Result<String> {
        let expected = self.integrity_tag(&envelope.payload, key, &envelope.salt);
        if expected != envelope.integrity_tag {
            return Err(SecureStoreError::Integrity(
                "integrity tag mismatch, data may be corrupted".into(),
            ));
        }

        let age_ms = self.clock.now_millis().saturating_sub(envelope.created_at);
        let max_age_ms = duration_millis(self.max_age);
        if age_ms > max_age_ms {
            return Err(SecureStoreError::Expired { age_ms, max_age_ms });
        }

        let sealed = EncryptedData::from_base64(&envelope.payload)?;
        let plaintext = AesGcmCipher::decrypt(key.secure_key(), &sealed, &envelope.aad())?;
        String::from_utf8(plaintext)
            .map_err(|_| SecureStoreError::Integrity("payload is not valid UTF-8".into()))
    }

    /// SHA-256 when a digest primitive is configured, rolling hash otherwise
    pub fn integrity_tag(&self, payload: &str, key: &KeyMaterial, salt: &str) -> String {
        let combined = format!("{}{}{}", payload, key.as_hex(), salt);
        match &self.digest {
            Some(digest) => digest.sha256_hex(&combined),
            None => rolling_hash(&combined),
        }
    }
}

/// Bytes as a comma-separated decimal list, e.g. `12,250,3`
fn salt_list(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

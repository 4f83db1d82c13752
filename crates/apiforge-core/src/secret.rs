//! Sealing of stored credentials
//!
//! Secrets in project configs are stored as [`SealedSecret`]s. The
//! [`SecretCipher`] trait is the seam; [`KeyedCipher`] is the shipped
//! implementation: ChaCha20-Poly1305 under a SHA-256-derived key, encoded
//! as `v1:<base64(nonce || ciphertext+tag)>`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::RngCore;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const VERSION_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// An encrypted secret as persisted. Never contains plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SealedSecret(String);

impl SealedSecret {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

/// A stored secret could not be decrypted, usually because the key changed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "cannot decrypt stored {what}: {reason}. The secret key may have changed; re-enter the secret with `apiforge config set`"
)]
pub struct ConfigDecryptionError {
    pub what: String,
    pub reason: String,
}

impl ConfigDecryptionError {
    fn new(what: &str, reason: impl Into<String>) -> Self {
        Self {
            what: what.to_string(),
            reason: reason.into(),
        }
    }

    /// Relabel the error with the config field it came from.
    #[must_use]
    pub fn for_field(mut self, what: &str) -> Self {
        self.what = what.to_string();
        self
    }
}

/// A secret could not be encrypted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot seal secret: {0}")]
pub struct SealError(pub String);

pub trait SecretCipher: Send + Sync {
    /// # Errors
    ///
    /// Fails only when the cipher rejects the input.
    fn seal(&self, plaintext: &str) -> Result<SealedSecret, SealError>;

    /// # Errors
    ///
    /// Fails when the value is malformed or was sealed under another key.
    fn open(&self, sealed: &SealedSecret) -> Result<String, ConfigDecryptionError>;
}

/// Cipher keyed by 32 bytes of derived key material.
#[derive(Clone)]
pub struct KeyedCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for KeyedCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyedCipher(..)")
    }
}

impl KeyedCipher {
    /// Derive the cipher from arbitrary key material (a passphrase or raw key).
    #[must_use]
    pub fn new(key_material: &[u8]) -> Self {
        Self {
            key: Sha256::new()
                .chain_update(b"apiforge-secret-key")
                .chain_update(key_material)
                .finalize()
                .into(),
        }
    }

    /// Fresh random key material, base64-encoded for storage in a key file.
    #[must_use]
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        B64.encode(key)
    }

    fn aead(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

impl SecretCipher for KeyedCipher {
    fn seal(&self, plaintext: &str) -> Result<SealedSecret, SealError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .aead()
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| SealError(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(SealedSecret(format!("{VERSION_PREFIX}{}", B64.encode(out))))
    }

    fn open(&self, sealed: &SealedSecret) -> Result<String, ConfigDecryptionError> {
        let encoded = sealed
            .0
            .strip_prefix(VERSION_PREFIX)
            .ok_or_else(|| ConfigDecryptionError::new("secret", "unknown format"))?;
        let raw = B64
            .decode(encoded)
            .map_err(|e| ConfigDecryptionError::new("secret", format!("invalid encoding: {e}")))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(ConfigDecryptionError::new("secret", "value is truncated"));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let data = self
            .aead()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ConfigDecryptionError::new("secret", "integrity check failed"))?;
        String::from_utf8(data)
            .map_err(|_| ConfigDecryptionError::new("secret", "plaintext is not UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let cipher = KeyedCipher::new(b"material");
        let sealed = cipher.seal("hunter2").unwrap();
        assert!(sealed.as_str().starts_with("v1:"));
        assert!(!sealed.as_str().contains("hunter2"));
        assert_eq!(cipher.open(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn nonce_makes_ciphertexts_differ() {
        let cipher = KeyedCipher::new(b"material");
        assert_ne!(cipher.seal("same").unwrap(), cipher.seal("same").unwrap());
    }

    #[test]
    fn wrong_key_reports_decryption_error() {
        let sealed = KeyedCipher::new(b"old key").seal("token-value").unwrap();
        let err = KeyedCipher::new(b"new key").open(&sealed).unwrap_err();
        assert!(err.to_string().contains("re-enter"), "{err}");
    }

    #[test]
    fn tampering_is_detected() {
        let cipher = KeyedCipher::new(b"k");
        let sealed = cipher
            .seal("a longer secret spanning more than one chacha block of sixty-four bytes")
            .unwrap();
        let mut raw = B64.decode(&sealed.as_str()[3..]).unwrap();
        raw[NONCE_LEN] ^= 1;
        let forged = SealedSecret::from_stored(format!("v1:{}", B64.encode(raw)));
        assert!(cipher.open(&forged).is_err());
        assert!(cipher.open(&SealedSecret::from_stored("plain")).is_err());

        let truncated =
            SealedSecret::from_stored(format!("v1:{}", B64.encode([0u8; NONCE_LEN + 4])));
        let err = cipher.open(&truncated).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn empty_secret_round_trips() {
        let cipher = KeyedCipher::new(b"k");
        let sealed = cipher.seal("").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), "");
    }

    #[test]
    fn generated_keys_are_distinct() {
        assert_ne!(KeyedCipher::generate_key(), KeyedCipher::generate_key());
    }
}

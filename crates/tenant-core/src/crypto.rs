//! Contact encryption and hashing.
//!
//! Stored contact numbers are AES-256-GCM encrypted; a separate salted
//! SHA-256 hash supports lookup without decryption. Keys come from
//! configuration; in dev an absent key is derived from a fixed seed so local
//! stacks work without provisioning secrets.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::context::RuntimeEnv;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption key or hash secret missing outside dev.
    #[error("contact crypto is not configured: {0}")]
    NotConfigured(&'static str),

    /// Ciphertext failed to decode or authenticate.
    #[error("invalid encrypted value")]
    InvalidCiphertext,

    /// Contact value failed normalization.
    #[error("contact value is invalid")]
    InvalidContact,
}

/// Strip a phone number down to digits and a leading `+`.
pub fn normalize_phone(raw: &str) -> Result<String, CryptoError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    if cleaned.is_empty() {
        return Err(CryptoError::InvalidContact);
    }
    Ok(cleaned)
}

/// Symmetric cipher + keyed hash for contact values.
#[derive(Clone)]
pub struct ContactCipher {
    key: [u8; 32],
    hash_secret: Vec<u8>,
}

impl ContactCipher {
    /// Build from configured key material.
    ///
    /// Empty or placeholder (`CHANGE_ME`) values are rejected outside dev;
    /// in dev they fall back to material derived from a fixed seed.
    pub fn new(
        encryption_key: &str,
        hash_secret: &str,
        env: RuntimeEnv,
    ) -> Result<Self, CryptoError> {
        let key_material = resolve_material(encryption_key, env, "encryption key")?;
        let hash_material = resolve_material(hash_secret, env, "hash secret")?;

        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(key_material.as_bytes()));
        Ok(Self {
            key,
            hash_secret: hash_material.into_bytes(),
        })
    }

    /// Encrypt a value; output is base64(nonce || ciphertext).
    pub fn encrypt(&self, value: &str) -> String {
        let cipher = Aes256Gcm::new_from_slice(&self.key).expect("key length is fixed");
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, value.as_bytes())
            .expect("AES-GCM encryption is infallible for in-memory data");
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        BASE64.encode(out)
    }

    /// Decrypt a value produced by [`ContactCipher::encrypt`].
    pub fn decrypt(&self, token: &str) -> Result<String, CryptoError> {
        let raw = BASE64
            .decode(token)
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        if raw.len() <= NONCE_LEN {
            return Err(CryptoError::InvalidCiphertext);
        }
        let (nonce_raw, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&self.key).expect("key length is fixed");
        let nonce = Nonce::from_slice(nonce_raw);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidCiphertext)
    }

    /// Keyed hash for lookup without decryption.
    pub fn hash(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.hash_secret);
        hasher.update(value.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn resolve_material(
    configured: &str,
    env: RuntimeEnv,
    what: &'static str,
) -> Result<String, CryptoError> {
    let trimmed = configured.trim();
    if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("change_me") {
        return Ok(trimmed.to_string());
    }
    if env.is_dev() {
        return Ok(hex::encode(Sha256::digest(b"presence-dev")));
    }
    Err(CryptoError::NotConfigured(what))
}

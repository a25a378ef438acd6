//! Secret reference resolution.
//!
//! A secret reference is an opaque string handed out by the control plane
//! (for example `tenant/acme/db` or `env:ACME_DB_PASSWORD`). The stores here
//! resolve a reference to its credential value without the caller knowing
//! where it lives:
//!
//! - [`FileSecretStore`] reads a JSON object from disk
//! - [`EnvSecretStore`] maps references onto environment variables
//!
//! Either store can fall back to the other, matching how local stacks layer
//! file-backed tenant credentials over env vars.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors surfaced while resolving a secret reference.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// The reference is unknown to every configured backend.
    #[error("secret ref not found: {0}")]
    NotFound(String),

    /// The backing store is unreachable or unreadable.
    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    /// The stored value has an unusable shape.
    #[error("secret value for {0} is invalid")]
    InvalidValue(String),
}

/// Resolves an opaque secret reference to a credential value.
///
/// Implementations must be cheap to call repeatedly; callers do not cache.
pub trait SecretStore: Send + Sync {
    fn get(&self, secret_ref: &str) -> Result<String, SecretStoreError>;
}

/// JSON-file-backed store. The file maps refs to either a bare string or an
/// object carrying the value under a conventional key.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, serde_json::Value>, SecretStoreError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|err| {
            SecretStoreError::Unavailable(format!("{}: {err}", self.path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|err| SecretStoreError::Unavailable(format!("invalid secret file: {err}")))
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, secret_ref: &str) -> Result<String, SecretStoreError> {
        let data = self.load()?;
        let value = data
            .get(secret_ref)
            .ok_or_else(|| SecretStoreError::NotFound(secret_ref.to_string()))?;
        extract_value(secret_ref, value)
    }
}

/// Environment-variable-backed store.
///
/// `env:NAME` refs read `NAME` directly; any other ref is uppercased,
/// non-alphanumerics collapsed to `_`, and prefixed with `TENANT_SECRET_`.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self {
            prefix: "TENANT_SECRET_".to_string(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn env_key(&self, secret_ref: &str) -> Option<String> {
        let secret_ref = secret_ref.trim();
        if secret_ref.is_empty() {
            return None;
        }
        if let Some(name) = secret_ref.strip_prefix("env:") {
            return Some(name.to_string());
        }
        if secret_ref.starts_with(&self.prefix) {
            return Some(secret_ref.to_string());
        }
        let mut normalized = String::with_capacity(secret_ref.len());
        let mut last_was_sep = false;
        for ch in secret_ref.chars() {
            if ch.is_ascii_alphanumeric() {
                normalized.push(ch.to_ascii_uppercase());
                last_was_sep = false;
            } else if !last_was_sep && !normalized.is_empty() {
                normalized.push('_');
                last_was_sep = true;
            }
        }
        let normalized = normalized.trim_end_matches('_');
        if normalized.is_empty() {
            return None;
        }
        Some(format!("{}{normalized}", self.prefix))
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, secret_ref: &str) -> Result<String, SecretStoreError> {
        let key = self
            .env_key(secret_ref)
            .ok_or_else(|| SecretStoreError::NotFound(secret_ref.to_string()))?;
        match std::env::var(&key) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(SecretStoreError::NotFound(secret_ref.to_string())),
        }
    }
}

/// A primary store with an optional fallback consulted on `NotFound`.
pub struct LayeredSecretStore {
    primary: Box<dyn SecretStore>,
    fallback: Option<Box<dyn SecretStore>>,
}

impl LayeredSecretStore {
    pub fn new(primary: Box<dyn SecretStore>, fallback: Option<Box<dyn SecretStore>>) -> Self {
        Self { primary, fallback }
    }
}

impl SecretStore for LayeredSecretStore {
    fn get(&self, secret_ref: &str) -> Result<String, SecretStoreError> {
        match self.primary.get(secret_ref) {
            Ok(value) => Ok(value),
            Err(SecretStoreError::NotFound(_)) | Err(SecretStoreError::Unavailable(_)) => {
                match &self.fallback {
                    Some(fallback) => fallback.get(secret_ref),
                    None => Err(SecretStoreError::NotFound(secret_ref.to_string())),
                }
            }
            Err(err) => Err(err),
        }
    }
}

fn extract_value(secret_ref: &str, value: &serde_json::Value) -> Result<String, SecretStoreError> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Object(map) => {
            for key in ["password", "value", "secret", "api_key"] {
                if let Some(inner) = map.get(key) {
                    if let Some(s) = inner.as_str() {
                        return Ok(s.to_string());
                    }
                    return Ok(inner.to_string());
                }
            }
            Err(SecretStoreError::InvalidValue(secret_ref.to_string()))
        }
        _ => Err(SecretStoreError::InvalidValue(secret_ref.to_string())),
    }
}

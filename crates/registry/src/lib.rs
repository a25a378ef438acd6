//! Tenant registry client.
//!
//! Resolves a tenant slug to connection coordinates via the control plane,
//! caching successful lookups for a bounded TTL. The remote call sits behind
//! [`RegistryFetch`] so the HTTP transport can be swapped for a test double.

mod fetch;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tenant_core::TenantContext;
use thiserror::Error;

pub use fetch::{HttpRegistryFetch, RegistryFetch};

/// One tenant's record as returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct TenantRegistryRecord {
    pub tenant_id: String,
    pub slug: String,
    pub db_name: String,
    pub db_host: String,
    pub db_port: String,
    pub db_user: String,
    pub secret_ref: String,
    #[serde(default = "default_tls_mode")]
    pub tls_mode: String,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_tls_mode() -> String {
    "disable".to_string()
}

fn default_status() -> String {
    "unknown".to_string()
}

impl TenantRegistryRecord {
    pub fn into_context(self) -> TenantContext {
        TenantContext {
            tenant_id: self.tenant_id,
            slug: self.slug,
            db_name: self.db_name,
            db_host: self.db_host,
            db_port: self.db_port,
            db_user: self.db_user,
            secret_ref: self.secret_ref,
            tls_mode: self.tls_mode,
            status: self.status,
        }
    }
}

/// Errors from tenant resolution.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The control plane has no active record for the slug. Maps to 404.
    #[error("tenant not found: {0}")]
    NotFound(String),

    /// Transport failure or non-404 error response. Maps to 502.
    #[error("tenant registry lookup failed: {0}")]
    Upstream(String),
}

/// TTL-cached registry client.
///
/// Safe for concurrent use. Concurrent misses for the same slug may each hit
/// the network; cache writes are whole-value replacements keyed by slug, so
/// the race costs a redundant call, never a wrong record.
pub struct TenantRegistryClient {
    fetch: Box<dyn RegistryFetch>,
    ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, TenantRegistryRecord)>>,
}

impl TenantRegistryClient {
    /// `ttl` of zero disables caching entirely.
    pub fn new(fetch: Box<dyn RegistryFetch>, ttl: Duration) -> Self {
        Self {
            fetch,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a slug, serving from cache while the entry is fresh.
    ///
    /// Failures are never cached; a 404 fails every call until the control
    /// plane knows the tenant.
    pub async fn get_tenant(&self, slug: &str) -> Result<TenantRegistryRecord, RegistryError> {
        let slug = slug.trim().to_ascii_lowercase();
        if !self.ttl.is_zero() {
            let cache = self.cache.lock().expect("registry cache poisoned");
            if let Some((expires_at, record)) = cache.get(&slug) {
                if *expires_at > Instant::now() {
                    return Ok(record.clone());
                }
            }
        }

        let record = self.fetch.fetch(&slug).await?;
        tracing::debug!(slug = %slug, tenant_id = %record.tenant_id, "resolved tenant");
        if !self.ttl.is_zero() {
            let mut cache = self.cache.lock().expect("registry cache poisoned");
            cache.insert(slug, (Instant::now() + self.ttl, record.clone()));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingFetch {
        calls: Arc<AtomicUsize>,
        known: Vec<String>,
    }

    #[async_trait::async_trait]
    impl RegistryFetch for CountingFetch {
        async fn fetch(&self, slug: &str) -> Result<TenantRegistryRecord, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.known.iter().any(|s| s == slug) {
                return Err(RegistryError::NotFound(slug.to_string()));
            }
            Ok(TenantRegistryRecord {
                tenant_id: format!("tenant-{slug}"),
                slug: slug.to_string(),
                db_name: format!("tenant_{slug}"),
                db_host: "db.internal".to_string(),
                db_port: "5432".to_string(),
                db_user: format!("{slug}_app"),
                secret_ref: format!("tenant/{slug}/db"),
                tls_mode: "disable".to_string(),
                status: "active".to_string(),
            })
        }
    }

    fn client_with(ttl: Duration, known: &[&str]) -> (TenantRegistryClient, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = CountingFetch {
            calls: calls.clone(),
            known: known.iter().map(|s| s.to_string()).collect(),
        };
        (TenantRegistryClient::new(Box::new(fetch), ttl), calls)
    }

    #[tokio::test]
    async fn serves_from_cache_within_ttl() {
        let (client, calls) = client_with(Duration::from_secs(30), &["acme"]);
        client.get_tenant("acme").await.unwrap();
        client.get_tenant("acme").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_after_ttl_expiry() {
        let (client, calls) = client_with(Duration::from_millis(40), &["acme"]);
        client.get_tenant("acme").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        client.get_tenant("acme").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let (client, calls) = client_with(Duration::ZERO, &["acme"]);
        client.get_tenant("acme").await.unwrap();
        client.get_tenant("acme").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn normalizes_slug_before_lookup() {
        let (client, calls) = client_with(Duration::from_secs(30), &["acme"]);
        client.get_tenant("  ACME ").await.unwrap();
        client.get_tenant("acme").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_is_never_cached() {
        let (client, calls) = client_with(Duration::from_secs(30), &[]);
        assert!(matches!(
            client.get_tenant("ghost").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            client.get_tenant("ghost").await,
            Err(RegistryError::NotFound(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

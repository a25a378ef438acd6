//! Per-tenant database session management.
//!
//! The session manager owns one connection pool per distinct tenant
//! connection identity. Identity includes the secret reference, so rotating
//! a tenant's credentials produces a fresh pool instead of reusing stale
//! connections. Pools are created lazily and migrated on first use.

use std::collections::HashMap;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;

use database::Database;
use secret_store::{SecretStore, SecretStoreError};
use tenant_core::{RuntimeEnv, TenantContext};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum TenantDbError {
    /// The tenant's credential could not be read from the secret store.
    /// Surfaces as a 502 at the API edge; the tenant is not at fault.
    #[error("secret {secret_ref} unavailable: {source}")]
    SecretUnavailable {
        secret_ref: String,
        #[source]
        source: SecretStoreError,
    },

    #[error("invalid tenant database coordinates: {0}")]
    InvalidCoordinates(String),

    #[error(transparent)]
    Database(#[from] database::DatabaseError),
}

pub type Result<T> = std::result::Result<T, TenantDbError>;

/// Lazily-populated cache of tenant database pools.
pub struct TenantSessionManager {
    data_dir: PathBuf,
    env: RuntimeEnv,
    secrets: Arc<dyn SecretStore>,
    pools: Mutex<HashMap<String, Database>>,
}

impl TenantSessionManager {
    pub fn new(data_dir: impl Into<PathBuf>, env: RuntimeEnv, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            data_dir: data_dir.into(),
            env,
            secrets,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Database handle for a tenant, creating and migrating the pool on
    /// first use. Subsequent calls with the same connection identity reuse
    /// the cached pool.
    pub async fn database_for(&self, ctx: &TenantContext) -> Result<Database> {
        let identity = ctx.connection_identity();

        let mut pools = self.pools.lock().await;
        if let Some(db) = pools.get(&identity) {
            return Ok(db.clone());
        }

        // The credential must be readable even though SQLite does not use a
        // password; an unreadable secret means the tenant record points at a
        // rotated or missing credential and must not be served.
        if let Err(source) = self.secrets.get(&ctx.secret_ref) {
            return Err(TenantDbError::SecretUnavailable {
                secret_ref: ctx.secret_ref.clone(),
                source,
            });
        }

        let host = self.effective_host(ctx);
        let db_name = sanitize_db_name(&ctx.db_name)?;
        let path = self.data_dir.join(format!("{db_name}.db"));
        let url = format!("sqlite:{}?mode=rwc", path.display());

        let db = Database::connect(&url).await?;
        db.migrate().await?;
        tracing::info!(
            tenant = %ctx.slug,
            db_name = %db_name,
            host = %host,
            "opened tenant database pool"
        );

        pools.insert(identity, db.clone());
        Ok(db)
    }

    /// In dev, an unresolvable registry host falls back to localhost so a
    /// laptop can run against records written for the cluster network. In
    /// prod the host is used as recorded.
    fn effective_host(&self, ctx: &TenantContext) -> String {
        if !self.env.is_dev() {
            return ctx.db_host.clone();
        }
        let addr = format!("{}:{}", ctx.db_host, ctx.db_port);
        let resolvable = addr
            .to_socket_addrs()
            .map(|mut addrs| addrs.next().is_some())
            .unwrap_or(false);
        if resolvable {
            ctx.db_host.clone()
        } else {
            tracing::debug!(host = %ctx.db_host, "host unresolvable in dev, using localhost");
            "localhost".to_string()
        }
    }

    /// Drop the cached pool for one connection identity, closing it.
    pub async fn evict(&self, identity: &str) {
        let removed = self.pools.lock().await.remove(identity);
        if let Some(db) = removed {
            db.close().await;
        }
    }

    pub async fn close_all(&self) {
        let mut pools = self.pools.lock().await;
        for (_, db) in pools.drain() {
            db.close().await;
        }
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.lock().await.len()
    }
}

/// Database names come from the registry and become file names; restrict
/// them to a safe alphabet so a hostile record cannot traverse paths.
fn sanitize_db_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TenantDbError::InvalidCoordinates("empty db_name".into()));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(TenantDbError::InvalidCoordinates(format!(
            "db_name {trimmed:?} contains unsupported characters"
        )));
    }
    Ok(trimmed.to_string())
}

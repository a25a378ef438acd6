//! Tenant context and runtime environment.

use serde::{Deserialize, Serialize};

/// Which environment the process runs in.
///
/// Dev unlocks conveniences (header-based tenant selection, host fallback,
/// derived crypto keys) that must stay closed in production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnv {
    Dev,
    Prod,
}

impl RuntimeEnv {
    /// Parse from an `ENV` style string. Anything that is not a dev alias is
    /// treated as production, so misconfiguration fails closed.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" => RuntimeEnv::Dev,
            _ => RuntimeEnv::Prod,
        }
    }

    pub fn is_dev(self) -> bool {
        matches!(self, RuntimeEnv::Dev)
    }
}

/// Resolved identity and connection coordinates for one tenant.
///
/// Immutable value produced per request from a registry record; never
/// persisted by this workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub slug: String,
    pub db_name: String,
    pub db_host: String,
    pub db_port: String,
    pub db_user: String,
    pub secret_ref: String,
    pub tls_mode: String,
    pub status: String,
}

impl TenantContext {
    /// Cache key for pooled connections: two contexts share a pool iff every
    /// coordinate that affects the connection matches, including the secret
    /// reference (so a credential rotation yields a fresh pool).
    pub fn connection_identity(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.db_host, self.db_port, self.db_name, self.db_user, self.secret_ref
        )
    }
}

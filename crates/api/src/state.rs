//! Shared handler state.

use std::sync::Arc;

use database::Database;
use face_matcher::FaceMatcher;
use registry::TenantRegistryClient;
use tenant_core::{ContactCipher, RuntimeEnv, TenantContext};
use tenant_db::TenantSessionManager;
use worker::JobQueue;

use crate::error::Result;

/// Gate protocol knobs, fixed at startup.
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Shared bootstrap token gate agents present once to obtain a session.
    pub bootstrap_token: String,
    pub session_ttl_seconds: i64,
    pub heartbeat_interval_seconds: u64,
    pub frame_cooldown_seconds: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub env: RuntimeEnv,
    pub registry: Arc<TenantRegistryClient>,
    pub sessions: Arc<TenantSessionManager>,
    pub matcher: Arc<dyn FaceMatcher>,
    pub cipher: ContactCipher,
    pub queue: JobQueue,
    pub gate: GateSettings,
}

impl AppState {
    /// Open (or reuse) the database pool for the request's tenant.
    pub async fn db(&self, ctx: &TenantContext) -> Result<Database> {
        Ok(self.sessions.database_for(ctx).await?)
    }
}

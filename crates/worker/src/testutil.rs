//! Shared fixture for job tests: one tenant ("acme") with a real SQLite
//! database in a temp directory, mock providers, and a capturable job queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use face_matcher::MockFaceMatcher;
use messaging::MockSmsSender;
use registry::{RegistryError, RegistryFetch, TenantRegistryClient, TenantRegistryRecord};
use secret_store::{SecretStore, SecretStoreError};
use tenant_core::{ContactCipher, RuntimeEnv};
use tenant_db::TenantSessionManager;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{Job, JobQueue, JobRunner};

pub(crate) const FRAME_SCOPE: &str = "visit_event";

struct StaticFetch;

#[async_trait]
impl RegistryFetch for StaticFetch {
    async fn fetch(&self, slug: &str) -> Result<TenantRegistryRecord, RegistryError> {
        if slug != "acme" {
            return Err(RegistryError::NotFound(slug.to_string()));
        }
        Ok(TenantRegistryRecord {
            tenant_id: "tenant-acme".to_string(),
            slug: "acme".to_string(),
            db_name: "tenant_acme".to_string(),
            db_host: "localhost".to_string(),
            db_port: "5432".to_string(),
            db_user: "acme_app".to_string(),
            secret_ref: "tenant/acme/db".to_string(),
            tls_mode: "disable".to_string(),
            status: "active".to_string(),
        })
    }
}

struct MapSecrets(HashMap<String, String>);

impl SecretStore for MapSecrets {
    fn get(&self, secret_ref: &str) -> Result<String, SecretStoreError> {
        self.0
            .get(secret_ref)
            .cloned()
            .ok_or_else(|| SecretStoreError::NotFound(secret_ref.to_string()))
    }
}

pub(crate) struct Harness {
    pub(crate) runner: JobRunner,
    pub(crate) rx: UnboundedReceiver<Job>,
    pub(crate) gate_id: String,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub(crate) async fn db(&self) -> database::Database {
        self.runner.database_for_slug("acme").await.unwrap()
    }
}

pub(crate) async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(TenantRegistryClient::new(
        Box::new(StaticFetch),
        Duration::from_secs(60),
    ));
    let mut secret_map = HashMap::new();
    secret_map.insert("tenant/acme/db".to_string(), "pw".to_string());
    let secrets: Arc<MapSecrets> = Arc::new(MapSecrets(secret_map));
    let sessions = Arc::new(TenantSessionManager::new(
        dir.path(),
        RuntimeEnv::Dev,
        secrets.clone(),
    ));
    let (queue, rx) = JobQueue::new();
    let runner = JobRunner::new(
        registry,
        sessions,
        Arc::new(MockFaceMatcher::new("tenant-acme", 98.0)),
        Arc::new(MockSmsSender),
        ContactCipher::new("", "", RuntimeEnv::Dev).unwrap(),
        secrets,
        queue,
        false,
    );

    let db = runner.database_for_slug("acme").await.unwrap();
    let gate = database::gate::create_gate(db.pool(), Some("main entrance"), "active")
        .await
        .unwrap();

    Harness {
        runner,
        rx,
        gate_id: gate.id,
        _dir: dir,
    }
}

//! Composition root: wire settings, providers, worker loop, and the router.

use std::sync::Arc;
use std::time::Duration;

use api::{build_router, AppState, GateSettings, Settings};
use face_matcher::{FaceMatcher, HttpFaceMatcher, HttpFaceMatcherConfig, MockFaceMatcher};
use messaging::{MnotifySender, MockSmsSender, SmsSender};
use registry::{HttpRegistryFetch, TenantRegistryClient};
use secret_store::{EnvSecretStore, FileSecretStore, LayeredSecretStore, SecretStore};
use tenant_core::ContactCipher;
use tenant_db::TenantSessionManager;
use tower_http::trace::TraceLayer;
use worker::{JobQueue, JobRunner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = Settings::from_env();
    tracing::info!(
        bind = %settings.bind_addr,
        env = ?settings.env,
        provider_mode = %settings.provider_mode,
        messaging_mode = %settings.messaging_mode,
        "starting presence api"
    );

    let secrets: Arc<dyn SecretStore> = match &settings.secrets_file {
        Some(path) => Arc::new(LayeredSecretStore::new(
            Box::new(FileSecretStore::new(path)),
            Some(Box::new(EnvSecretStore::new())),
        )),
        None => Arc::new(EnvSecretStore::new()),
    };

    let registry = Arc::new(TenantRegistryClient::new(
        Box::new(HttpRegistryFetch::new(
            &settings.registry_base_url,
            &settings.registry_token,
        )?),
        Duration::from_secs(settings.registry_cache_ttl_seconds),
    ));
    let sessions = Arc::new(TenantSessionManager::new(
        &settings.data_dir,
        settings.env,
        secrets.clone(),
    ));

    let matcher: Arc<dyn FaceMatcher> = build_matcher(&settings)?;
    let sms: Arc<dyn SmsSender> = match settings.messaging_mode.as_str() {
        "mock" => Arc::new(MockSmsSender),
        _ => Arc::new(MnotifySender::new(
            &settings.mnotify_base_url,
            Duration::from_secs(settings.mnotify_timeout_seconds),
        )?),
    };
    let cipher = ContactCipher::new(
        &settings.contact_encryption_key,
        &settings.contact_hash_secret,
        settings.env,
    )?;

    let (queue, rx) = JobQueue::new();
    let runner = Arc::new(JobRunner::new(
        registry.clone(),
        sessions.clone(),
        matcher.clone(),
        sms,
        cipher.clone(),
        secrets,
        queue.clone(),
        settings.messaging_mode != "mock",
    ));
    tokio::spawn(worker::run_loop(runner, rx));

    let state = AppState {
        env: settings.env,
        registry,
        sessions,
        matcher,
        cipher,
        queue,
        gate: GateSettings {
            bootstrap_token: settings.gate_bootstrap_token.clone(),
            session_ttl_seconds: settings.gate_session_ttl_seconds,
            heartbeat_interval_seconds: settings.gate_heartbeat_interval_seconds,
            frame_cooldown_seconds: settings.gate_frame_cooldown_seconds,
        },
    };
    let app = build_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

fn build_matcher(settings: &Settings) -> Result<Arc<dyn FaceMatcher>, Box<dyn std::error::Error>> {
    let hosted_configured = settings.face_api_url.is_some() && settings.face_api_key.is_some();
    let use_hosted = match settings.provider_mode.as_str() {
        "mock" => false,
        "http" => true,
        _ => hosted_configured,
    };
    if use_hosted {
        let config = HttpFaceMatcherConfig::from_parts(
            settings.face_api_url.clone(),
            settings.face_api_key.clone(),
            settings.face_collection_ref.clone(),
        )?;
        Ok(Arc::new(HttpFaceMatcher::new(config)?))
    } else {
        Ok(Arc::new(MockFaceMatcher::new(
            settings.face_collection_ref.clone(),
            settings.mock_face_confidence,
        )))
    }
}

//! Router-level tests: one tenant ("acme") resolved via the dev header, a
//! real SQLite database in a temp directory, and mock providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use api::{build_router, AppState, GateSettings};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use database::gate;
use face_matcher::MockFaceMatcher;
use registry::{RegistryError, RegistryFetch, TenantRegistryClient, TenantRegistryRecord};
use secret_store::{SecretStore, SecretStoreError};
use serde_json::{json, Value};
use tenant_core::{ContactCipher, RuntimeEnv, TenantContext};
use tenant_db::TenantSessionManager;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::util::ServiceExt;
use worker::{Job, JobQueue};

const BOOTSTRAP: &str = "boot-secret";

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

struct TestApp {
    router: Router,
    state: AppState,
    rx: UnboundedReceiver<Job>,
    _dir: tempfile::TempDir,
}

impl TestApp {
    fn ctx() -> TenantContext {
        TenantContext {
            tenant_id: "tenant-acme".into(),
            slug: "acme".into(),
            db_name: "tenant_acme".into(),
            db_host: "localhost".into(),
            db_port: "5432".into(),
            db_user: "acme_app".into(),
            secret_ref: "tenant/acme/db".into(),
            tls_mode: "disable".into(),
            status: "active".into(),
        }
    }

    async fn db(&self) -> database::Database {
        self.state.sessions.database_for(&Self::ctx()).await.unwrap()
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

async fn app() -> TestApp {
    app_with_cooldown(0).await
}

async fn app_with_cooldown(frame_cooldown_seconds: i64) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(TenantRegistryClient::new(
        Box::new(StaticFetch),
        Duration::from_secs(60),
    ));
    let mut secrets = HashMap::new();
    secrets.insert("tenant/acme/db".to_string(), "pw".to_string());
    let sessions = Arc::new(TenantSessionManager::new(
        dir.path(),
        RuntimeEnv::Dev,
        Arc::new(MapSecrets(secrets)),
    ));
    let (queue, rx) = JobQueue::new();
    let state = AppState {
        env: RuntimeEnv::Dev,
        registry,
        sessions,
        matcher: Arc::new(MockFaceMatcher::new("tenant-acme", 97.0)),
        cipher: ContactCipher::new("", "", RuntimeEnv::Dev).unwrap(),
        queue,
        gate: GateSettings {
            bootstrap_token: BOOTSTRAP.to_string(),
            session_ttl_seconds: 3600,
            heartbeat_interval_seconds: 30,
            frame_cooldown_seconds,
        },
    };
    TestApp {
        router: build_router(state.clone()),
        state,
        rx,
        _dir: dir,
    }
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-tenant-slug", "acme")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

fn multipart_request(uri: &str, token: &str, fields: &[(&str, &[u8], bool)]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value, is_file) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        if *is_file {
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"frame.jpg\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
        } else {
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
        }
        body.extend_from_slice(value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-tenant-slug", "acme")
        .header("authorization", format!("Bearer {token}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Create a gate and bootstrap a session, returning (gate_id, session_token).
async fn gate_session(app: &TestApp) -> (String, String) {
    let db = app.db().await;
    let gate_row = gate::create_gate(db.pool(), Some("main entrance"), "active")
        .await
        .unwrap();
    let (status, body) = app
        .send(json_request(
            "POST",
            "/v1/gate/auth/session",
            &json!({ "gate_id": gate_row.id, "bootstrap_token": BOOTSTRAP }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "session bootstrap failed: {body}");
    let token = body["session_token"].as_str().unwrap().to_string();
    (gate_row.id, token)
}

#[tokio::test]
async fn healthz_is_served_without_a_tenant() {
    let app = app().await;
    let req = Request::builder()
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unknown_tenant_resolves_to_404() {
    let app = app().await;
    let req = Request::builder()
        .uri("/v1/people")
        .header("x-tenant-slug", "ghost")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "unknown tenant");
}

#[tokio::test]
async fn hosts_without_a_subdomain_are_rejected() {
    let app = app().await;
    for host in ["localhost:8080", "127.0.0.1", "gateway"] {
        let req = Request::builder()
            .uri("/v1/people")
            .header("host", host)
            .body(Body::empty())
            .unwrap();
        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "host {host:?}: {body}");
        assert_eq!(body["detail"], "Tenant subdomain required");
    }
}

#[tokio::test]
async fn bootstrap_token_is_single_use() {
    let app = app().await;
    let (gate_id, _token) = gate_session(&app).await;

    let (status, body) = app
        .send(json_request(
            "POST",
            "/v1/gate/auth/session",
            &json!({ "gate_id": gate_id, "bootstrap_token": BOOTSTRAP }),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["detail"], "bootstrap token already used");
}

#[tokio::test]
async fn wrong_bootstrap_token_is_unauthorized() {
    let app = app().await;
    let db = app.db().await;
    let gate_row = gate::create_gate(db.pool(), None, "active").await.unwrap();

    let (status, _) = app
        .send(json_request(
            "POST",
            "/v1/gate/auth/session",
            &json!({ "gate_id": gate_row.id, "bootstrap_token": "nope" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn heartbeat_accepts_an_active_session() {
    let app = app().await;
    let (gate_id, token) = gate_session(&app).await;

    let mut req = json_request(
        "POST",
        "/v1/gate/heartbeat",
        &json!({ "gate_id": gate_id, "details": { "uptime_sec": 12 } }),
    );
    req.headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    let (status, body) = app.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
    assert_eq!(body["details"]["uptime_sec"], 12);
}

#[tokio::test]
async fn revoked_session_token_is_forbidden() {
    let app = app().await;
    let (gate_id, token) = gate_session(&app).await;

    let db = app.db().await;
    gate::revoke_active_sessions(db.pool(), &gate_id).await.unwrap();

    let mut req = json_request("POST", "/v1/gate/heartbeat", &json!({}));
    req.headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    let (status, body) = app.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "gate session revoked");
}

#[tokio::test]
async fn frame_submission_is_idempotent_by_frame_id() {
    let mut app = app().await;
    let (gate_id, token) = gate_session(&app).await;
    let frame_id = uuid::Uuid::new_v4().to_string();

    let fields: Vec<(&str, &[u8], bool)> = vec![
        ("frame_id", frame_id.as_bytes(), false),
        ("gate_id", gate_id.as_bytes(), false),
        ("captured_at", b"2026-08-26T09:00:00Z", false),
        ("image", b"jpeg-bytes-1", true),
    ];

    let (status, first) = app
        .send(multipart_request("/v1/gate/frames", &token, &fields))
        .await;
    assert_eq!(status, StatusCode::OK, "first submission failed: {first}");
    assert_eq!(first["accepted"], true);
    let job_id = first["job_id"].as_str().unwrap().to_string();

    match app.rx.try_recv().unwrap() {
        Job::Recognition {
            frame_id: job_frame,
            job_id: dispatched,
            image,
            ..
        } => {
            assert_eq!(job_frame, frame_id);
            assert_eq!(dispatched, job_id);
            assert_eq!(image, b"jpeg-bytes-1");
        }
        other => panic!("unexpected job: {}", other.kind()),
    }

    let (status, replay) = app
        .send(multipart_request("/v1/gate/frames", &token, &fields))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["idempotent"], true);
    assert_eq!(replay["job_id"], job_id.as_str());
    assert!(app.rx.try_recv().is_err(), "replay must not enqueue work");

    let changed: Vec<(&str, &[u8], bool)> = vec![
        ("frame_id", frame_id.as_bytes(), false),
        ("gate_id", gate_id.as_bytes(), false),
        ("captured_at", b"2026-08-26T09:00:00Z", false),
        ("image", b"jpeg-bytes-2", true),
    ];
    let (status, conflict) = app
        .send(multipart_request("/v1/gate/frames", &token, &changed))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["detail"], "frame_id already used with different payload");
}

#[tokio::test]
async fn frame_cooldown_throttles_back_to_back_frames() {
    let app = app_with_cooldown(30).await;
    let (gate_id, token) = gate_session(&app).await;

    let first_frame = uuid::Uuid::new_v4().to_string();
    let fields: Vec<(&str, &[u8], bool)> = vec![
        ("frame_id", first_frame.as_bytes(), false),
        ("gate_id", gate_id.as_bytes(), false),
        ("captured_at", b"2026-08-26T09:00:00Z", false),
        ("image", b"jpeg-bytes-1", true),
    ];
    let (status, _) = app
        .send(multipart_request("/v1/gate/frames", &token, &fields))
        .await;
    assert_eq!(status, StatusCode::OK);

    let second_frame = uuid::Uuid::new_v4().to_string();
    let fields: Vec<(&str, &[u8], bool)> = vec![
        ("frame_id", second_frame.as_bytes(), false),
        ("gate_id", gate_id.as_bytes(), false),
        ("captured_at", b"2026-08-26T09:00:01Z", false),
        ("image", b"jpeg-bytes-2", true),
    ];
    let (status, body) = app
        .send(multipart_request("/v1/gate/frames", &token, &fields))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "{body}");
}

#[tokio::test]
async fn session_gate_mismatch_is_forbidden() {
    let app = app().await;
    let (_gate_id, token) = gate_session(&app).await;
    let db = app.db().await;
    let other = gate::create_gate(db.pool(), Some("side door"), "active")
        .await
        .unwrap();

    let frame_id = uuid::Uuid::new_v4().to_string();
    let fields: Vec<(&str, &[u8], bool)> = vec![
        ("frame_id", frame_id.as_bytes(), false),
        ("gate_id", other.id.as_bytes(), false),
        ("captured_at", b"2026-08-26T09:00:00Z", false),
        ("image", b"jpeg-bytes", true),
    ];
    let (status, _) = app
        .send(multipart_request("/v1/gate/frames", &token, &fields))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

async fn consented_person_with_phone(app: &TestApp) -> String {
    let (status, body) = app
        .send(json_request(
            "POST",
            "/v1/people",
            &json!({
                "full_name": "Ama Mensah",
                "phone": "+233 24 000 0001",
                "consent_status": "consented",
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "person create failed: {body}");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn message_send_replays_under_the_same_key() {
    let mut app = app().await;
    let person_id = consented_person_with_phone(&app).await;

    let payload = json!({ "person_id": person_id, "body": "Service starts at 9am" });
    let mut req = json_request("POST", "/v1/messages/send", &payload);
    req.headers_mut()
        .insert("idempotency-key", "key-1".parse().unwrap());
    let (status, first) = app.send(req).await;
    assert_eq!(status, StatusCode::OK, "send failed: {first}");
    assert_eq!(first["status"], "queued");
    let log_id = first["message_log_id"].as_str().unwrap().to_string();
    assert!(matches!(app.rx.try_recv().unwrap(), Job::SendMessage { .. }));

    let mut req = json_request("POST", "/v1/messages/send", &payload);
    req.headers_mut()
        .insert("idempotency-key", "key-1".parse().unwrap());
    let (status, replay) = app.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["idempotent"], true);
    assert_eq!(replay["message_log_id"], log_id.as_str());
    assert!(app.rx.try_recv().is_err(), "replay must not enqueue work");

    let mut req = json_request(
        "POST",
        "/v1/messages/send",
        &json!({ "person_id": person_id, "body": "Different text" }),
    );
    req.headers_mut()
        .insert("idempotency-key", "key-1".parse().unwrap());
    let (status, _) = app.send(req).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn message_send_requires_consent() {
    let app = app().await;
    let (status, body) = app
        .send(json_request(
            "POST",
            "/v1/people",
            &json!({ "full_name": "Kofi Boateng", "phone": "+233240000002" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let person_id = body["id"].as_str().unwrap();

    let (status, body) = app
        .send(json_request(
            "POST",
            "/v1/messages/send",
            &json!({ "person_id": person_id, "body": "hello" }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "person has not consented");
}

#[tokio::test]
async fn message_send_rejects_ambiguous_recipients() {
    let app = app().await;
    let (status, _) = app
        .send(json_request(
            "POST",
            "/v1/messages/send",
            &json!({ "body": "hello" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .send(json_request(
            "POST",
            "/v1/messages/send",
            &json!({ "person_id": "p", "to_phone": "+233240000003", "body": "hello" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn face_enrollment_requires_consent_confirmation() {
    let app = app().await;
    let (status, body) = app
        .send(json_request(
            "POST",
            "/v1/people",
            &json!({ "full_name": "Yaa Asantewaa" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let person_id = body["id"].as_str().unwrap().to_string();

    let uri = format!("/v1/people/{person_id}/faces");
    let fields: Vec<(&str, &[u8], bool)> = vec![("images", b"face-image-1", true)];
    let mut req = multipart_request(&uri, "unused", &fields);
    req.headers_mut().remove("authorization");
    let (status, body) = app.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["detail"], "consent required to enroll faces");
}

#[tokio::test]
async fn deleting_faces_is_idempotent() {
    let app = app().await;
    let person_id = consented_person_with_phone(&app).await;

    let uri = format!("/v1/people/{person_id}/faces");
    let fields: Vec<(&str, &[u8], bool)> = vec![("images", b"face-image-1", true)];
    let mut req = multipart_request(&uri, "unused", &fields);
    req.headers_mut().remove("authorization");
    let (status, enrolled) = app.send(req).await;
    assert_eq!(status, StatusCode::OK, "enrollment failed: {enrolled}");
    let face_ids = enrolled["face_ids"].as_array().unwrap();
    assert_eq!(face_ids.len(), 1);

    let req = Request::builder()
        .method("DELETE")
        .uri(&uri)
        .header("x-tenant-slug", "acme")
        .body(Body::empty())
        .unwrap();
    let (status, first) = app.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["deleted_ids"].as_array().unwrap().len(), 1);

    let req = Request::builder()
        .method("DELETE")
        .uri(&uri)
        .header("x-tenant-slug", "acme")
        .body(Body::empty())
        .unwrap();
    let (status, second) = app.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(second["deleted_ids"].as_array().unwrap().is_empty());

    let (status, person) = app
        .send(
            Request::builder()
                .uri(format!("/v1/people/{person_id}"))
                .header("x-tenant-slug", "acme")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(person["consent_status"], "revoked");
}

#[tokio::test]
async fn config_patch_overrides_defaults() {
    let app = app().await;
    let (status, body) = app
        .send(json_request(
            "PATCH",
            "/v1/config",
            &json!({ "key": "min_confidence", "value": 80 }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let items = body["items"].as_array().unwrap();
    let min_conf = items
        .iter()
        .find(|i| i["key"] == "min_confidence")
        .unwrap();
    assert_eq!(min_conf["value"], 80);
}

#[tokio::test]
async fn rule_run_is_queued_and_dispatched() {
    let mut app = app().await;
    let (status, rule) = app
        .send(json_request(
            "POST",
            "/v1/rules",
            &json!({ "name": "Welcome new visitors", "rule_type": "welcome" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{rule}");
    let rule_id = rule["id"].as_str().unwrap();

    let (status, run) = app
        .send(json_request(
            "POST",
            &format!("/v1/rules/{rule_id}/run"),
            &json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "queued");

    match app.rx.try_recv().unwrap() {
        Job::RunRule {
            rule_id: dispatched,
            run_id,
            ..
        } => {
            assert_eq!(dispatched, rule_id);
            assert_eq!(run_id, run["run_id"].as_str().unwrap());
        }
        other => panic!("unexpected job: {}", other.kind()),
    }
}

//! Gate device protocol: session bootstrap, heartbeat, frame submission.

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use database::{gate, idempotency, now_rfc3339};
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use tenant_core::{frame_request_hash, sha256_hex, TenantContext};
use uuid::Uuid;
use worker::Job;

use crate::error::{ApiError, Result};
use crate::state::AppState;
use crate::tenant::gate_session;

const FRAME_SCOPE: &str = "visit_event";

#[derive(Deserialize)]
pub struct AuthSessionRequest {
    #[serde(default)]
    gate_id: String,
    #[serde(default)]
    bootstrap_token: String,
}

/// Exchange the shared bootstrap token for a per-gate session token.
/// Bootstrap tokens are single-use; issuing a session revokes any prior
/// active session for the gate.
pub async fn auth_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(payload): Json<AuthSessionRequest>,
) -> Result<Json<serde_json::Value>> {
    if payload.gate_id.trim().is_empty() || payload.bootstrap_token.trim().is_empty() {
        return Err(ApiError::Validation(
            "gate_id and bootstrap_token are required".to_string(),
        ));
    }
    if Uuid::parse_str(&payload.gate_id).is_err() {
        return Err(ApiError::Validation("gate_id must be a UUID".to_string()));
    }

    let db = state.db(&ctx).await?;
    let pool = db.pool();

    let gate_row = gate::find_gate(pool, &payload.gate_id)
        .await?
        .filter(|g| g.status == "active")
        .ok_or(ApiError::Forbidden("gate not found or inactive"))?;

    if state.gate.bootstrap_token.is_empty()
        || payload.bootstrap_token != state.gate.bootstrap_token
    {
        return Err(ApiError::Unauthorized("invalid bootstrap token"));
    }

    let bootstrap_hash = sha256_hex(payload.bootstrap_token.as_bytes());
    if gate::bootstrap_hash_used(pool, &bootstrap_hash).await? {
        return Err(ApiError::Conflict(
            "bootstrap token already used".to_string(),
        ));
    }

    let mut token_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut token_bytes);
    let session_token = hex::encode(token_bytes);
    let expires_at = (Utc::now() + Duration::seconds(state.gate.session_ttl_seconds))
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut tx = pool.begin().await.map_err(database::DatabaseError::from)?;
    gate::revoke_active_sessions(&mut *tx, &gate_row.id).await?;
    let session = gate::insert_session(
        &mut *tx,
        &gate_row.id,
        &sha256_hex(session_token.as_bytes()),
        Some(&bootstrap_hash),
        "bootstrap",
        &expires_at,
    )
    .await?;
    tx.commit().await.map_err(database::DatabaseError::from)?;

    tracing::info!(tenant = %ctx.slug, gate_id = %gate_row.id, "gate session issued");
    Ok(Json(json!({
        "session_token": session_token,
        "expires_at": session.expires_at,
        "heartbeat_interval_sec": state.gate.heartbeat_interval_seconds,
        "clock_skew_ms": 0,
    })))
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    gate_id: Option<String>,
    #[serde(default)]
    details: serde_json::Value,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    headers: HeaderMap,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Json<serde_json::Value>> {
    let db = state.db(&ctx).await?;
    let pool = db.pool();
    let session = gate_session(&headers, pool).await?;

    if let Some(gate_id) = payload.gate_id.as_deref() {
        if gate_id != session.gate_id {
            return Err(ApiError::Forbidden("session does not belong to this gate"));
        }
    }
    gate::touch_last_seen(pool, &session.id).await?;

    Ok(Json(json!({
        "accepted": true,
        "details": payload.details,
        "server_time": now_rfc3339(),
    })))
}

struct FrameForm {
    frame_id: String,
    gate_id: String,
    captured_at: String,
    image: Vec<u8>,
    motion_score: Option<f64>,
    face_present: Option<bool>,
}

async fn read_frame_form(mut multipart: Multipart) -> Result<FrameForm> {
    let mut frame_id = None;
    let mut gate_id = None;
    let mut captured_at = None;
    let mut image = None;
    let mut motion_score = None;
    let mut face_present = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::Validation("malformed multipart body".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "frame_id" => frame_id = Some(read_text(field).await?),
            "gate_id" => gate_id = Some(read_text(field).await?),
            "captured_at" => captured_at = Some(read_text(field).await?),
            "image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::Validation("unreadable image field".to_string()))?;
                image = Some(bytes.to_vec());
            }
            "motion_score" => {
                let raw = read_text(field).await?;
                motion_score = Some(raw.trim().parse().map_err(|_| {
                    ApiError::Validation("motion_score must be a number".to_string())
                })?);
            }
            "face_present" => {
                let raw = read_text(field).await?;
                face_present = Some(match raw.trim() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => {
                        return Err(ApiError::Validation(
                            "face_present must be a boolean".to_string(),
                        ))
                    }
                });
            }
            _ => {}
        }
    }

    let frame_id =
        frame_id.ok_or_else(|| ApiError::Validation("frame_id is required".to_string()))?;
    let gate_id =
        gate_id.ok_or_else(|| ApiError::Validation("gate_id is required".to_string()))?;
    let captured_at =
        captured_at.ok_or_else(|| ApiError::Validation("captured_at is required".to_string()))?;
    let image = image.ok_or_else(|| ApiError::Validation("image is required".to_string()))?;

    if Uuid::parse_str(&frame_id).is_err() || Uuid::parse_str(&gate_id).is_err() {
        return Err(ApiError::Validation(
            "frame_id and gate_id must be UUIDs".to_string(),
        ));
    }
    let captured_at = DateTime::parse_from_rfc3339(&captured_at)
        .map_err(|_| ApiError::Validation("captured_at must be an RFC 3339 timestamp".to_string()))?
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    Ok(FrameForm {
        frame_id,
        gate_id,
        captured_at,
        image,
        motion_score,
        face_present,
    })
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|_| ApiError::Validation("unreadable multipart field".to_string()))
}

/// Accept a captured frame for asynchronous recognition. The frame id is the
/// idempotency key: a replay with identical payload returns the original job
/// id, a replay with a different payload is a conflict. The image itself is
/// handed to the worker and never persisted.
pub async fn submit_frame(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let form = read_frame_form(multipart).await?;

    let db = state.db(&ctx).await?;
    let pool = db.pool();
    let session = gate_session(&headers, pool).await?;

    if form.gate_id != session.gate_id {
        return Err(ApiError::Forbidden("session does not belong to this gate"));
    }
    let gate_row = gate::find_gate(pool, &session.gate_id)
        .await?
        .filter(|g| g.status == "active")
        .ok_or(ApiError::Forbidden("gate not found or inactive"))?;

    if state.gate.frame_cooldown_seconds > 0 {
        if let Some(last) = session
            .last_frame_at
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        {
            let elapsed = Utc::now().signed_duration_since(last.with_timezone(&Utc));
            if elapsed < Duration::seconds(state.gate.frame_cooldown_seconds) {
                return Err(ApiError::RateLimited("frame rate exceeded"));
            }
        }
    }

    let request_hash = frame_request_hash(
        &form.frame_id,
        &form.gate_id,
        &form.captured_at,
        &form.image,
        form.motion_score,
        form.face_present,
    );

    if let Some(record) = idempotency::find_by_key(pool, &form.frame_id).await? {
        if record.request_hash != request_hash {
            return Err(ApiError::Conflict(
                "frame_id already used with different payload".to_string(),
            ));
        }
        return Ok(Json(json!({
            "accepted": true,
            "frame_id": form.frame_id,
            "job_id": record.response_ref,
            "idempotent": true,
        })));
    }

    let job_id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await.map_err(database::DatabaseError::from)?;
    let inserted = idempotency::insert(
        &mut *tx,
        FRAME_SCOPE,
        &form.frame_id,
        &request_hash,
        &job_id,
        "pending",
    )
    .await;
    match inserted {
        Ok(_) => {}
        // Lost a concurrent first-submission race: re-read as a replay.
        Err(err) if err.is_unique_violation() => {
            drop(tx);
            let record = idempotency::find_by_key(pool, &form.frame_id)
                .await?
                .ok_or_else(|| ApiError::Internal("ledger row vanished".to_string()))?;
            if record.request_hash != request_hash {
                return Err(ApiError::Conflict(
                    "frame_id already used with different payload".to_string(),
                ));
            }
            return Ok(Json(json!({
                "accepted": true,
                "frame_id": form.frame_id,
                "job_id": record.response_ref,
                "idempotent": true,
            })));
        }
        Err(err) => return Err(err.into()),
    }
    gate::touch_last_frame(&mut *tx, &session.id).await?;
    tx.commit().await.map_err(database::DatabaseError::from)?;

    state.queue.dispatch(Job::Recognition {
        tenant_slug: ctx.slug.clone(),
        frame_id: form.frame_id.clone(),
        gate_id: gate_row.id,
        captured_at: form.captured_at,
        request_hash,
        job_id: job_id.clone(),
        image: form.image,
        session_id: Some(session.id),
        face_present: form.face_present,
        motion_score: form.motion_score,
    });

    Ok(Json(json!({
        "accepted": true,
        "frame_id": form.frame_id,
        "job_id": job_id,
    })))
}

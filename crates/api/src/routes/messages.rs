//! Outbound messaging: idempotent send, delivery logs, templates.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use database::{idempotency, message, person, MessageLog, MessageTemplate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tenant_core::{message_request_hash, normalize_phone, TenantContext};
use uuid::Uuid;
use worker::Job;

use crate::error::{ApiError, Result};
use crate::state::AppState;

const MESSAGE_SCOPE: &str = "message_send";

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default = "default_channel")]
    channel: String,
    #[serde(default)]
    person_id: Option<String>,
    #[serde(default)]
    to_phone: Option<String>,
    #[serde(default)]
    template_id: Option<String>,
    #[serde(default)]
    context: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    body: Option<String>,
}

fn default_channel() -> String {
    "sms".to_string()
}

/// Queue one SMS for delivery. The caller supplies either a `person_id`
/// (consent enforced) or a raw `to_phone`; the body comes from an active
/// template rendered against `context`, or verbatim from `body`. An
/// `Idempotency-Key` header makes the call replay-safe.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    headers: HeaderMap,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<serde_json::Value>> {
    if payload.channel != "sms" {
        return Err(ApiError::Validation("channel must be sms".to_string()));
    }
    if payload.person_id.is_some() == payload.to_phone.is_some() {
        return Err(ApiError::Validation(
            "provide exactly one of person_id or to_phone".to_string(),
        ));
    }

    let db = state.db(&ctx).await?;
    let pool = db.pool();

    // Resolve the recipient to an encrypted number and its lookup hash.
    let (person_id, phone_enc, phone_hash) = match &payload.person_id {
        Some(id) => {
            let p = person::find_person(pool, id)
                .await?
                .ok_or_else(|| ApiError::NotFound("person not found".to_string()))?;
            if p.consent_status != "consented" {
                return Err(ApiError::Forbidden("person has not consented"));
            }
            let enc = p
                .phone_enc
                .ok_or_else(|| ApiError::Validation("person has no phone on file".to_string()))?;
            (Some(p.id), enc, p.phone_hash)
        }
        None => {
            let raw = payload.to_phone.as_deref().unwrap_or("");
            let normalized = normalize_phone(raw)?;
            let enc = state.cipher.encrypt(&normalized);
            let hash = state.cipher.hash(&normalized);
            (None, enc, Some(hash))
        }
    };

    let (template_id, body) = match &payload.template_id {
        Some(id) => {
            let template = message::find_template(pool, id)
                .await?
                .filter(|t| t.active)
                .ok_or_else(|| ApiError::NotFound("template not found or inactive".to_string()))?;
            let body = render_with_context(&template, &payload.context)?;
            (Some(template.id), body)
        }
        None => {
            let body = payload
                .body
                .as_deref()
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .ok_or_else(|| {
                    ApiError::Validation("body is required without template_id".to_string())
                })?;
            (None, body.to_string())
        }
    };

    let request_hash = message_request_hash(
        person_id.as_deref(),
        phone_hash.as_deref(),
        template_id.as_deref(),
        &payload.channel,
        &body,
    );

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| format!("{MESSAGE_SCOPE}:{k}"));

    if let Some(key) = &idempotency_key {
        match idempotency::begin(pool, key, &request_hash).await? {
            idempotency::Submission::Replay(record) => {
                return Ok(Json(json!({
                    "message_log_id": record.response_ref,
                    "status": "queued",
                    "idempotent": true,
                })));
            }
            idempotency::Submission::Fresh => {}
        }
    }

    let log_id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await.map_err(database::DatabaseError::from)?;
    message::insert_queued_log(
        &mut *tx,
        &log_id,
        person_id.as_deref(),
        template_id.as_deref(),
        &payload.channel,
        Some(&phone_enc),
        phone_hash.as_deref(),
    )
    .await?;
    if let Some(key) = &idempotency_key {
        idempotency::insert(&mut *tx, MESSAGE_SCOPE, key, &request_hash, &log_id, "accepted")
            .await?;
    }
    tx.commit().await.map_err(database::DatabaseError::from)?;

    state.queue.dispatch(Job::SendMessage {
        tenant_slug: ctx.slug.clone(),
        message_log_id: log_id.clone(),
        body: Some(body),
    });

    Ok(Json(json!({ "message_log_id": log_id, "status": "queued" })))
}

/// Render a template body against caller-supplied context values. Every
/// variable the template declares must be present.
fn render_with_context(
    template: &MessageTemplate,
    context: &serde_json::Map<String, serde_json::Value>,
) -> Result<String> {
    let variables: Vec<String> = template
        .variables_json
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();

    let mut body = template.body.clone();
    for name in &variables {
        let value = context
            .get(name)
            .and_then(scalar_to_string)
            .ok_or_else(|| {
                ApiError::Validation(format!("missing template variable: {name}"))
            })?;
        body = body.replace(&format!("{{{name}}}"), &value);
    }
    Ok(body)
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    person_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Log rows as returned to staff; encrypted contact values never leave the
/// database layer.
#[derive(Serialize)]
pub struct MessageLogOut {
    id: String,
    person_id: Option<String>,
    template_id: Option<String>,
    channel: String,
    status: String,
    provider_message_id: Option<String>,
    cost_cents: Option<i64>,
    sent_at: Option<String>,
    error_code: Option<String>,
    created_at: String,
}

impl From<MessageLog> for MessageLogOut {
    fn from(log: MessageLog) -> Self {
        Self {
            id: log.id,
            person_id: log.person_id,
            template_id: log.template_id,
            channel: log.channel,
            status: log.status,
            provider_message_id: log.provider_message_id,
            cost_cents: log.cost_cents,
            sent_at: log.sent_at,
            error_code: log.error_code,
            created_at: log.created_at,
        }
    }
}

pub async fn list_logs(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Query(query): Query<LogQuery>,
) -> Result<Json<serde_json::Value>> {
    if !(1..=200).contains(&query.limit) || query.offset < 0 {
        return Err(ApiError::Validation(
            "limit must be 1-200 and offset non-negative".to_string(),
        ));
    }
    let db = state.db(&ctx).await?;
    let logs = message::list_logs(
        db.pool(),
        query.status.as_deref(),
        query.person_id.as_deref(),
        query.limit,
        query.offset,
    )
    .await?;
    let items: Vec<MessageLogOut> = logs.into_iter().map(MessageLogOut::from).collect();
    Ok(Json(json!({ "items": items })))
}

#[derive(Deserialize)]
pub struct CreateTemplateRequest {
    #[serde(default)]
    name: String,
    #[serde(default = "default_channel")]
    channel: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    variables: Vec<String>,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

pub async fn create_template(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(payload): Json<CreateTemplateRequest>,
) -> Result<Json<MessageTemplate>> {
    if payload.name.trim().is_empty() || payload.body.trim().is_empty() {
        return Err(ApiError::Validation("name and body are required".to_string()));
    }
    let db = state.db(&ctx).await?;
    let template = message::create_template(
        db.pool(),
        payload.name.trim(),
        &payload.channel,
        &payload.body,
        &payload.variables,
        payload.active,
    )
    .await?;
    Ok(Json(template))
}

pub async fn list_templates(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<serde_json::Value>> {
    let db = state.db(&ctx).await?;
    let templates = message::list_templates(db.pool()).await?;
    Ok(Json(json!({ "items": templates })))
}

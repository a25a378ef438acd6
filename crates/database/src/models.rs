//! Row models for the per-tenant schema.
//!
//! IDs are TEXT UUIDs; timestamps are RFC 3339 UTC strings (see
//! [`crate::now_rfc3339`]). JSON columns are stored as TEXT and parsed with
//! `serde_json` at the call site.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A person known to the tenant (member or visitor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Person {
    pub id: String,
    pub full_name: String,
    /// `unknown`, `consented` or `revoked`.
    pub consent_status: String,
    /// Encrypted contact number; never stored in the clear.
    pub phone_enc: Option<String>,
    /// Keyed hash of the normalized number, for lookup without decryption.
    pub phone_hash: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A consent grant or revocation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ConsentEvent {
    pub id: String,
    pub person_id: String,
    pub status: String,
    pub source: String,
    pub created_at: String,
}

/// An enrolled face for a person at the matching provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FaceProfile {
    pub id: String,
    pub person_id: String,
    pub provider: String,
    pub face_id: String,
    pub collection_ref: String,
    /// `active`, `inactive` or `deleted`.
    pub status: String,
    pub consent_event_id: Option<String>,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

/// A physical access checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Gate {
    pub id: String,
    pub name: Option<String>,
    pub status: String,
    pub created_at: String,
}

/// Bearer-token session for an edge device. At most one active session per
/// gate; issuing a new one revokes the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GateAgentSession {
    pub id: String,
    pub gate_id: String,
    pub session_token_hash: String,
    pub bootstrap_token_hash: Option<String>,
    pub auth_method: String,
    /// `active` or `revoked`.
    pub status: String,
    pub issued_at: String,
    pub expires_at: String,
    pub last_seen_at: Option<String>,
    pub last_frame_at: Option<String>,
    pub created_at: String,
}

/// At-most-once execution record shared by handlers and jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct IdempotencyRecord {
    pub id: String,
    /// Partition of the key namespace, e.g. `message_send` or `visit_event`.
    pub scope: String,
    pub key: String,
    /// Digest over every field that determines side effects.
    pub request_hash: String,
    pub response_ref: Option<String>,
    pub status: String,
    pub created_at: String,
}

/// One recognition decision per processed frame. Written exactly once and
/// never mutated; `metadata_json` must never contain raw image bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecognitionResult {
    pub id: String,
    pub frame_id: String,
    pub gate_id: String,
    pub session_id: Option<String>,
    pub processed_at: Option<String>,
    pub latency_ms: Option<i64>,
    pub best_confidence: Option<f64>,
    pub best_face_id: Option<String>,
    pub person_id: Option<String>,
    /// `matched`, `unknown` or `error`.
    pub decision: String,
    pub rejection_reason: Option<String>,
    pub provider_response_code: Option<String>,
    pub metadata_json: Option<String>,
}

/// One visit per frame, written atomically with its recognition result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct VisitEvent {
    pub id: String,
    pub frame_id: String,
    pub gate_id: String,
    pub captured_at: String,
    pub person_id: Option<String>,
    pub status: String,
    pub created_at: String,
}

/// A reusable message body with `{variable}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MessageTemplate {
    pub id: String,
    pub name: String,
    pub channel: String,
    pub body: String,
    /// JSON array of declared variable names.
    pub variables_json: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// One message send attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MessageLog {
    pub id: String,
    pub person_id: Option<String>,
    pub template_id: Option<String>,
    pub channel: String,
    pub to_phone_enc: Option<String>,
    pub to_phone_hash: Option<String>,
    /// `queued`, `retry`, `sent` or `failed`.
    pub status: String,
    pub provider_message_id: Option<String>,
    pub cost_cents: Option<i64>,
    pub sent_at: Option<String>,
    pub error_code: Option<String>,
    pub provider_response_json: Option<String>,
    pub created_at: String,
}

/// A tenant-configured automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Rule {
    pub id: String,
    pub name: String,
    /// `welcome` or `absence`.
    pub rule_type: String,
    pub status: String,
    pub config_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One execution of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RuleRun {
    pub id: String,
    pub rule_id: String,
    pub run_at: String,
    /// `queued`, `completed`, `skipped` or `failed`.
    pub status: String,
    pub stats_json: Option<String>,
    pub created_at: String,
}

/// A follow-up task created by the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FollowUpTask {
    pub id: String,
    pub person_id: String,
    pub rule_id: Option<String>,
    pub assigned_to_user_id: Option<String>,
    /// `open`, `in_progress`, `closed` or `resolved`.
    pub status: String,
    pub priority: i64,
    pub due_at: Option<String>,
    pub created_at: String,
    pub closed_at: Option<String>,
    pub notes: Option<String>,
}

/// A tenant configuration entry; the value is JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TenantConfigEntry {
    pub key: String,
    pub value_json: String,
    pub created_at: String,
    pub updated_at: String,
}

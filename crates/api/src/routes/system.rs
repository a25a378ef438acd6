//! Liveness endpoints served without a tenant context.

use axum::Json;
use serde_json::json;

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Liveness stub kept on the tenant-resolution allow-list.
pub async fn metrics() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

//! Read-only listings: recognition results and the audit trail.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use database::{audit, recognition};
use serde::Deserialize;
use serde_json::json;
use tenant_core::TenantContext;

use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_recognition_results(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>> {
    if !(1..=200).contains(&query.limit) {
        return Err(ApiError::Validation("limit must be 1-200".to_string()));
    }
    let db = state.db(&ctx).await?;
    let results = recognition::list_results(db.pool(), query.limit).await?;
    Ok(Json(json!({ "items": results })))
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>> {
    if !(1..=200).contains(&query.limit) {
        return Err(ApiError::Validation("limit must be 1-200".to_string()));
    }
    let db = state.db(&ctx).await?;
    let logs = audit::list_recent(db.pool(), query.limit).await?;
    Ok(Json(json!({ "items": logs })))
}

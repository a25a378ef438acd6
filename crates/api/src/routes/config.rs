//! Tenant configuration: stored overrides merged over built-in defaults.

use axum::extract::State;
use axum::{Extension, Json};
use database::config;
use serde::Deserialize;
use serde_json::json;
use tenant_core::TenantContext;

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Keys whose values are secrets; reads return a placeholder.
const SECRET_KEYS: &[&str] = &["sms_api_key"];

fn masked(key: &str, value: &serde_json::Value) -> serde_json::Value {
    if SECRET_KEYS.contains(&key) && !value.is_null() {
        json!("***")
    } else {
        value.clone()
    }
}

pub async fn get_config(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<serde_json::Value>> {
    let db = state.db(&ctx).await?;
    let entries = config::list_effective(db.pool()).await?;
    let items: Vec<serde_json::Value> = entries
        .iter()
        .map(|(key, value)| json!({ "key": key, "value": masked(key, value) }))
        .collect();
    Ok(Json(json!({ "items": items })))
}

#[derive(Deserialize)]
pub struct ConfigItem {
    key: String,
    value: serde_json::Value,
}

/// Accepts either `{"items": [{key, value}, ...]}` or a single `{key, value}`.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum PatchConfigRequest {
    Batch { items: Vec<ConfigItem> },
    Single(ConfigItem),
}

pub async fn patch_config(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(payload): Json<PatchConfigRequest>,
) -> Result<Json<serde_json::Value>> {
    let items = match payload {
        PatchConfigRequest::Batch { items } => items,
        PatchConfigRequest::Single(item) => vec![item],
    };
    if items.is_empty() || items.iter().any(|i| i.key.trim().is_empty()) {
        return Err(ApiError::Validation(
            "provide items with non-empty keys".to_string(),
        ));
    }

    let db = state.db(&ctx).await?;
    let pool = db.pool();
    let mut tx = pool.begin().await.map_err(database::DatabaseError::from)?;
    for item in &items {
        config::set_value(&mut *tx, item.key.trim(), &item.value).await?;
    }
    tx.commit().await.map_err(database::DatabaseError::from)?;
    tracing::info!(tenant = %ctx.slug, keys = items.len(), "tenant config updated");

    let entries = config::list_effective(pool).await?;
    let items: Vec<serde_json::Value> = entries
        .iter()
        .map(|(key, value)| json!({ "key": key, "value": masked(key, value) }))
        .collect();
    Ok(Json(json!({ "items": items })))
}

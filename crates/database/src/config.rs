//! Tenant configuration: JSON values keyed by name, with seeded defaults.

use sqlx::SqliteExecutor;

use crate::models::TenantConfigEntry;
use crate::{now_rfc3339, Result};

/// Built-in defaults, used when a tenant has not overridden a key.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("recognition_threshold", "null"),
    ("min_confidence", "90"),
    ("sms_enabled", "true"),
    ("sms_sender_id", "null"),
    ("sms_api_key", "null"),
    ("absence_threshold_mode", "\"sessions\""),
    ("absence_threshold_sessions", "6"),
    ("absence_threshold_weeks", "3"),
    ("welcome_cooldown_minutes", "1440"),
    ("followup_escalation_days", "3"),
];

/// Read a config value, falling back to the built-in default.
pub async fn get_value(
    executor: impl SqliteExecutor<'_>,
    key: &str,
) -> Result<Option<serde_json::Value>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT value_json FROM tenant_config WHERE key = ?")
            .bind(key)
            .fetch_optional(executor)
            .await?;
    let raw = match row {
        Some((raw,)) => raw,
        None => match DEFAULTS.iter().find(|(k, _)| *k == key) {
            Some((_, default)) => default.to_string(),
            None => return Ok(None),
        },
    };
    let value = serde_json::from_str(&raw)
        .map_err(|err| crate::DatabaseError::InvalidData(format!("config {key}: {err}")))?;
    Ok(Some(value))
}

/// Convenience accessors that coerce loosely, matching how operators write
/// config values (a threshold may arrive as `90`, `90.0` or `"90"`).
pub async fn get_f64(
    executor: impl SqliteExecutor<'_>,
    key: &str,
    default: f64,
) -> Result<f64> {
    Ok(get_value(executor, key)
        .await?
        .and_then(|v| coerce_f64(&v))
        .unwrap_or(default))
}

pub async fn get_i64(executor: impl SqliteExecutor<'_>, key: &str, default: i64) -> Result<i64> {
    Ok(get_value(executor, key)
        .await?
        .and_then(|v| coerce_f64(&v))
        .map(|f| f as i64)
        .unwrap_or(default))
}

pub async fn get_bool(
    executor: impl SqliteExecutor<'_>,
    key: &str,
    default: bool,
) -> Result<bool> {
    Ok(get_value(executor, key)
        .await?
        .and_then(|v| v.as_bool())
        .unwrap_or(default))
}

pub async fn get_string(
    executor: impl SqliteExecutor<'_>,
    key: &str,
) -> Result<Option<String>> {
    Ok(get_value(executor, key)
        .await?
        .and_then(|v| v.as_str().map(str::to_string)))
}

fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Upsert a config value.
pub async fn set_value(
    executor: impl SqliteExecutor<'_>,
    key: &str,
    value: &serde_json::Value,
) -> Result<()> {
    let now = now_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO tenant_config (key, value_json, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value_json = excluded.value_json,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await?;
    Ok(())
}

/// All stored entries plus defaults for keys not yet overridden.
pub async fn list_effective(
    executor: impl SqliteExecutor<'_>,
) -> Result<Vec<(String, serde_json::Value)>> {
    let stored = sqlx::query_as::<_, TenantConfigEntry>(
        "SELECT key, value_json, created_at, updated_at FROM tenant_config ORDER BY key",
    )
    .fetch_all(executor)
    .await?;

    let mut entries: Vec<(String, serde_json::Value)> = Vec::new();
    for entry in &stored {
        let value = serde_json::from_str(&entry.value_json).map_err(|err| {
            crate::DatabaseError::InvalidData(format!("config {}: {err}", entry.key))
        })?;
        entries.push((entry.key.clone(), value));
    }
    for (key, default) in DEFAULTS {
        if !stored.iter().any(|e| e.key == *key) {
            let value = serde_json::from_str(default).map_err(|err| {
                crate::DatabaseError::InvalidData(format!("config default {key}: {err}"))
            })?;
            entries.push((key.to_string(), value));
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;

    #[tokio::test]
    async fn defaults_apply_until_overridden() {
        let db = test_db().await;
        let pool = db.pool();

        assert_eq!(get_f64(pool, "min_confidence", 0.0).await.unwrap(), 90.0);
        set_value(pool, "min_confidence", &serde_json::json!(85)).await.unwrap();
        assert_eq!(get_f64(pool, "min_confidence", 0.0).await.unwrap(), 85.0);

        // Unknown key yields the caller's default.
        assert_eq!(get_i64(pool, "no_such_key", 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn coercion_accepts_stringly_numbers() {
        let db = test_db().await;
        let pool = db.pool();
        set_value(pool, "min_confidence", &serde_json::json!("0.9"))
            .await
            .unwrap();
        assert_eq!(get_f64(pool, "min_confidence", 0.0).await.unwrap(), 0.9);
    }

    #[tokio::test]
    async fn effective_listing_merges_defaults() {
        let db = test_db().await;
        let pool = db.pool();
        set_value(pool, "sms_enabled", &serde_json::json!(false)).await.unwrap();
        let entries = list_effective(pool).await.unwrap();
        let sms = entries.iter().find(|(k, _)| k == "sms_enabled").unwrap();
        assert_eq!(sms.1, serde_json::json!(false));
        assert!(entries.iter().any(|(k, _)| k == "welcome_cooldown_minutes"));
    }
}

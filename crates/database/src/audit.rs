//! Append-only audit trail for sensitive operations.

use serde::Serialize;
use sqlx::{FromRow, SqliteExecutor};
use uuid::Uuid;

use crate::{now_rfc3339, Result};

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct AuditLog {
    pub id: String,
    pub actor_type: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub metadata_json: Option<String>,
    pub created_at: String,
}

pub async fn insert_audit_log(
    executor: impl SqliteExecutor<'_>,
    actor_type: &str,
    action: &str,
    target_type: &str,
    target_id: &str,
    metadata_json: Option<&str>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, actor_type, action, target_type, target_id, metadata_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(actor_type)
    .bind(action)
    .bind(target_type)
    .bind(target_id)
    .bind(metadata_json)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(id)
}

pub async fn list_recent(
    executor: impl SqliteExecutor<'_>,
    limit: i64,
) -> Result<Vec<AuditLog>> {
    let logs = sqlx::query_as::<_, AuditLog>(
        r#"
        SELECT id, actor_type, action, target_type, target_id, metadata_json, created_at
        FROM audit_logs ORDER BY created_at DESC LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;

    #[tokio::test]
    async fn audit_rows_are_written() {
        let db = test_db().await;
        let pool = db.pool();
        insert_audit_log(pool, "system", "face_profile_deleted", "person", "p-1", None)
            .await
            .unwrap();

        let logs = list_recent(pool, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "face_profile_deleted");
        assert_eq!(logs[0].target_id, "p-1");
    }
}

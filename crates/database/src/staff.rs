//! Staff users and role assignments.

use sqlx::SqliteExecutor;
use uuid::Uuid;

use crate::{now_rfc3339, Result};

pub async fn create_user(executor: impl SqliteExecutor<'_>, email: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO users (id, email, status, created_at) VALUES (?, ?, 'active', ?)")
        .bind(&id)
        .bind(email)
        .bind(now_rfc3339())
        .execute(executor)
        .await?;
    Ok(id)
}

pub async fn create_role(executor: impl SqliteExecutor<'_>, name: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO roles (id, name, created_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(now_rfc3339())
        .execute(executor)
        .await?;
    Ok(id)
}

pub async fn assign_role(
    executor: impl SqliteExecutor<'_>,
    user_id: &str,
    role_id: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO user_roles (id, user_id, role_id, is_active, assigned_at) VALUES (?, ?, ?, 1, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(role_id)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(id)
}

/// First active user holding the named role, oldest assignment first so the
/// escalation target is stable across runs.
pub async fn find_user_id_with_role(
    executor: impl SqliteExecutor<'_>,
    role_name: &str,
) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT u.id
        FROM users u
        JOIN user_roles ur ON ur.user_id = u.id AND ur.is_active = 1
        JOIN roles r ON r.id = ur.role_id
        WHERE r.name = ? AND u.status = 'active'
        ORDER BY ur.assigned_at
        LIMIT 1
        "#,
    )
    .bind(role_name)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|(id,)| id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;

    #[tokio::test]
    async fn role_lookup_prefers_oldest_active_assignment() {
        let db = test_db().await;
        let pool = db.pool();

        let pastor = create_role(pool, "Pastor").await.unwrap();
        let first = create_user(pool, "first@example.org").await.unwrap();
        assign_role(pool, &first, &pastor).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = create_user(pool, "second@example.org").await.unwrap();
        assign_role(pool, &second, &pastor).await.unwrap();

        assert_eq!(
            find_user_id_with_role(pool, "Pastor").await.unwrap(),
            Some(first)
        );
        assert_eq!(find_user_id_with_role(pool, "BranchAdmin").await.unwrap(), None);
    }
}

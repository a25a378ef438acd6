//! Gates and gate-agent sessions.

use sqlx::SqliteExecutor;
use uuid::Uuid;

use crate::models::{Gate, GateAgentSession};
use crate::{now_rfc3339, Result};

pub async fn create_gate(
    executor: impl SqliteExecutor<'_>,
    name: Option<&str>,
    status: &str,
) -> Result<Gate> {
    let gate = Gate {
        id: Uuid::new_v4().to_string(),
        name: name.map(str::to_string),
        status: status.to_string(),
        created_at: now_rfc3339(),
    };
    sqlx::query("INSERT INTO gates (id, name, status, created_at) VALUES (?, ?, ?, ?)")
        .bind(&gate.id)
        .bind(&gate.name)
        .bind(&gate.status)
        .bind(&gate.created_at)
        .execute(executor)
        .await?;
    Ok(gate)
}

pub async fn find_gate(executor: impl SqliteExecutor<'_>, id: &str) -> Result<Option<Gate>> {
    let gate = sqlx::query_as::<_, Gate>(
        "SELECT id, name, status, created_at FROM gates WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(gate)
}

/// Revoke every active session for a gate. Issuing a new session calls this
/// first, so revocation is total-order per gate.
pub async fn revoke_active_sessions(
    executor: impl SqliteExecutor<'_>,
    gate_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE gate_agent_sessions SET status = 'revoked' WHERE gate_id = ? AND status = 'active'",
    )
    .bind(gate_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_session(
    executor: impl SqliteExecutor<'_>,
    gate_id: &str,
    session_token_hash: &str,
    bootstrap_token_hash: Option<&str>,
    auth_method: &str,
    expires_at: &str,
) -> Result<GateAgentSession> {
    let now = now_rfc3339();
    let session = GateAgentSession {
        id: Uuid::new_v4().to_string(),
        gate_id: gate_id.to_string(),
        session_token_hash: session_token_hash.to_string(),
        bootstrap_token_hash: bootstrap_token_hash.map(str::to_string),
        auth_method: auth_method.to_string(),
        status: "active".to_string(),
        issued_at: now.clone(),
        expires_at: expires_at.to_string(),
        last_seen_at: Some(now.clone()),
        last_frame_at: None,
        created_at: now,
    };
    sqlx::query(
        r#"
        INSERT INTO gate_agent_sessions
            (id, gate_id, session_token_hash, bootstrap_token_hash, auth_method, status,
             issued_at, expires_at, last_seen_at, last_frame_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(&session.gate_id)
    .bind(&session.session_token_hash)
    .bind(&session.bootstrap_token_hash)
    .bind(&session.auth_method)
    .bind(&session.status)
    .bind(&session.issued_at)
    .bind(&session.expires_at)
    .bind(&session.last_seen_at)
    .bind(&session.last_frame_at)
    .bind(&session.created_at)
    .execute(executor)
    .await?;
    Ok(session)
}

pub async fn find_session_by_token_hash(
    executor: impl SqliteExecutor<'_>,
    token_hash: &str,
) -> Result<Option<GateAgentSession>> {
    let session = sqlx::query_as::<_, GateAgentSession>(
        r#"
        SELECT id, gate_id, session_token_hash, bootstrap_token_hash, auth_method, status,
               issued_at, expires_at, last_seen_at, last_frame_at, created_at
        FROM gate_agent_sessions WHERE session_token_hash = ?
        "#,
    )
    .bind(token_hash)
    .fetch_optional(executor)
    .await?;
    Ok(session)
}

/// Whether a bootstrap token was already consumed (single-use tokens).
pub async fn bootstrap_hash_used(
    executor: impl SqliteExecutor<'_>,
    bootstrap_token_hash: &str,
) -> Result<bool> {
    let existing: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM gate_agent_sessions WHERE bootstrap_token_hash = ?",
    )
    .bind(bootstrap_token_hash)
    .fetch_optional(executor)
    .await?;
    Ok(existing.is_some())
}

pub async fn touch_last_seen(
    executor: impl SqliteExecutor<'_>,
    session_id: &str,
) -> Result<()> {
    sqlx::query("UPDATE gate_agent_sessions SET last_seen_at = ? WHERE id = ?")
        .bind(now_rfc3339())
        .bind(session_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Record an accepted frame; starts the per-gate cooldown window.
pub async fn touch_last_frame(
    executor: impl SqliteExecutor<'_>,
    session_id: &str,
) -> Result<()> {
    let now = now_rfc3339();
    sqlx::query("UPDATE gate_agent_sessions SET last_frame_at = ?, last_seen_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&now)
        .bind(session_id)
        .execute(executor)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;

    #[tokio::test]
    async fn issuing_new_session_revokes_previous() {
        let db = test_db().await;
        let pool = db.pool();
        let gate = create_gate(pool, Some("north door"), "active").await.unwrap();

        insert_session(pool, &gate.id, "hash-1", Some("boot-1"), "bootstrap_token", "2999-01-01T00:00:00.000Z")
            .await
            .unwrap();
        revoke_active_sessions(pool, &gate.id).await.unwrap();
        insert_session(pool, &gate.id, "hash-2", Some("boot-2"), "bootstrap_token", "2999-01-01T00:00:00.000Z")
            .await
            .unwrap();

        let first = find_session_by_token_hash(pool, "hash-1").await.unwrap().unwrap();
        assert_eq!(first.status, "revoked");
        let second = find_session_by_token_hash(pool, "hash-2").await.unwrap().unwrap();
        assert_eq!(second.status, "active");
    }

    #[tokio::test]
    async fn bootstrap_tokens_are_single_use() {
        let db = test_db().await;
        let pool = db.pool();
        let gate = create_gate(pool, None, "active").await.unwrap();
        assert!(!bootstrap_hash_used(pool, "boot-1").await.unwrap());
        insert_session(pool, &gate.id, "hash-1", Some("boot-1"), "bootstrap_token", "2999-01-01T00:00:00.000Z")
            .await
            .unwrap();
        assert!(bootstrap_hash_used(pool, "boot-1").await.unwrap());
    }
}

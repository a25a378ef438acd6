//! The idempotency ledger: keyed at-most-once execution records shared by
//! HTTP handlers and background jobs.
//!
//! Protocol: the caller looks up `(scope, key)` with [`begin`]. A hit with a
//! matching request hash is a replay - return the stored `response_ref`
//! without re-executing. A hit with a different hash is a conflict - the key
//! was reused for a semantically different request. A miss means the caller
//! inserts the ledger row with [`insert`] inside the same transaction as the
//! side-effect-producing row, so at most one committed side effect exists per
//! key. Losers of a concurrent first-submission race hit the unique
//! constraint on `key` and must re-read as a replay, not re-apply.

use sqlx::SqliteExecutor;
use uuid::Uuid;

use crate::models::IdempotencyRecord;
use crate::{now_rfc3339, DatabaseError, Result};

/// Outcome of checking the ledger before producing a side effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// No record: the caller should execute and insert the ledger row in the
    /// same transaction.
    Fresh,
    /// The key was already used with an identical request hash.
    Replay(IdempotencyRecord),
}

/// Fetch a ledger record by key (keys are globally unique across scopes).
pub async fn find_by_key(
    executor: impl SqliteExecutor<'_>,
    key: &str,
) -> Result<Option<IdempotencyRecord>> {
    let record = sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        SELECT id, scope, key, request_hash, response_ref, status, created_at
        FROM idempotency_keys
        WHERE key = ?
        "#,
    )
    .bind(key)
    .fetch_optional(executor)
    .await?;
    Ok(record)
}

/// Check the ledger for a prior submission of `key`.
///
/// Returns [`Submission::Replay`] when the stored request hash matches, and
/// [`DatabaseError::IdempotencyConflict`] when it does not.
pub async fn begin(
    executor: impl SqliteExecutor<'_>,
    key: &str,
    request_hash: &str,
) -> Result<Submission> {
    match find_by_key(executor, key).await? {
        None => Ok(Submission::Fresh),
        Some(record) if record.request_hash == request_hash => Ok(Submission::Replay(record)),
        Some(record) => Err(DatabaseError::IdempotencyConflict { key: record.key }),
    }
}

/// Insert a ledger row. Must run in the same transaction as the side effect
/// it guards.
pub async fn insert(
    executor: impl SqliteExecutor<'_>,
    scope: &str,
    key: &str,
    request_hash: &str,
    response_ref: &str,
    status: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO idempotency_keys (id, scope, key, request_hash, response_ref, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(scope)
    .bind(key)
    .bind(request_hash)
    .bind(response_ref)
    .bind(status)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(id)
}

/// Move a ledger row to a terminal status by key.
pub async fn mark_status_by_key(
    executor: impl SqliteExecutor<'_>,
    key: &str,
    status: &str,
    response_ref: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE idempotency_keys SET status = ?, response_ref = ?
        WHERE key = ?
        "#,
    )
    .bind(status)
    .bind(response_ref)
    .bind(key)
    .execute(executor)
    .await?;
    Ok(())
}

/// Move ledger rows referencing a produced result to a terminal status.
/// Used by the messaging job, which knows the message log id, not the key.
pub async fn mark_status_by_response_ref(
    executor: impl SqliteExecutor<'_>,
    scope: &str,
    response_ref: &str,
    status: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE idempotency_keys SET status = ?
        WHERE scope = ? AND response_ref = ?
        "#,
    )
    .bind(status)
    .bind(scope)
    .bind(response_ref)
    .execute(executor)
    .await?;
    Ok(())
}

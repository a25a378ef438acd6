//! Message templates and send logs.

use sqlx::SqliteExecutor;
use uuid::Uuid;

use crate::models::{MessageLog, MessageTemplate};
use crate::{now_rfc3339, Result};

pub async fn create_template(
    executor: impl SqliteExecutor<'_>,
    name: &str,
    channel: &str,
    body: &str,
    variables: &[String],
    active: bool,
) -> Result<MessageTemplate> {
    let now = now_rfc3339();
    let template = MessageTemplate {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        channel: channel.to_string(),
        body: body.to_string(),
        variables_json: serde_json::to_string(variables).ok(),
        active,
        created_at: now.clone(),
        updated_at: now,
    };
    sqlx::query(
        r#"
        INSERT INTO message_templates (id, name, channel, body, variables_json, active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&template.id)
    .bind(&template.name)
    .bind(&template.channel)
    .bind(&template.body)
    .bind(&template.variables_json)
    .bind(template.active)
    .bind(&template.created_at)
    .bind(&template.updated_at)
    .execute(executor)
    .await?;
    Ok(template)
}

pub async fn find_template(
    executor: impl SqliteExecutor<'_>,
    id: &str,
) -> Result<Option<MessageTemplate>> {
    let template = sqlx::query_as::<_, MessageTemplate>(
        r#"
        SELECT id, name, channel, body, variables_json, active, created_at, updated_at
        FROM message_templates WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(template)
}

/// Active template by name; rule config references templates by name.
pub async fn find_active_template_by_name(
    executor: impl SqliteExecutor<'_>,
    name: &str,
) -> Result<Option<MessageTemplate>> {
    let template = sqlx::query_as::<_, MessageTemplate>(
        r#"
        SELECT id, name, channel, body, variables_json, active, created_at, updated_at
        FROM message_templates WHERE name = ? AND active = 1
        "#,
    )
    .bind(name)
    .fetch_optional(executor)
    .await?;
    Ok(template)
}

pub async fn list_templates(executor: impl SqliteExecutor<'_>) -> Result<Vec<MessageTemplate>> {
    let templates = sqlx::query_as::<_, MessageTemplate>(
        r#"
        SELECT id, name, channel, body, variables_json, active, created_at, updated_at
        FROM message_templates ORDER BY created_at
        "#,
    )
    .fetch_all(executor)
    .await?;
    Ok(templates)
}

/// Insert a queued message log row.
pub async fn insert_queued_log(
    executor: impl SqliteExecutor<'_>,
    id: &str,
    person_id: Option<&str>,
    template_id: Option<&str>,
    channel: &str,
    to_phone_enc: Option<&str>,
    to_phone_hash: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO message_logs
            (id, person_id, template_id, channel, to_phone_enc, to_phone_hash, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 'queued', ?)
        "#,
    )
    .bind(id)
    .bind(person_id)
    .bind(template_id)
    .bind(channel)
    .bind(to_phone_enc)
    .bind(to_phone_hash)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn find_log(
    executor: impl SqliteExecutor<'_>,
    id: &str,
) -> Result<Option<MessageLog>> {
    let log = sqlx::query_as::<_, MessageLog>(
        r#"
        SELECT id, person_id, template_id, channel, to_phone_enc, to_phone_hash, status,
               provider_message_id, cost_cents, sent_at, error_code, provider_response_json,
               created_at
        FROM message_logs WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(log)
}

pub async fn list_logs(
    executor: impl SqliteExecutor<'_>,
    status: Option<&str>,
    person_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<MessageLog>> {
    // Optional filters collapse to always-true predicates when absent.
    let logs = sqlx::query_as::<_, MessageLog>(
        r#"
        SELECT id, person_id, template_id, channel, to_phone_enc, to_phone_hash, status,
               provider_message_id, cost_cents, sent_at, error_code, provider_response_json,
               created_at
        FROM message_logs
        WHERE (?1 IS NULL OR status = ?1)
          AND (?2 IS NULL OR person_id = ?2)
        ORDER BY created_at DESC
        LIMIT ?3 OFFSET ?4
        "#,
    )
    .bind(status)
    .bind(person_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await?;
    Ok(logs)
}

/// Whether a message from this template went to this person since `cutoff`.
/// Drives the welcome-rule cooldown.
pub async fn recent_log_exists(
    executor: impl SqliteExecutor<'_>,
    person_id: &str,
    template_id: &str,
    cutoff: &str,
) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT id FROM message_logs
        WHERE person_id = ? AND template_id = ? AND created_at >= ?
        LIMIT 1
        "#,
    )
    .bind(person_id)
    .bind(template_id)
    .bind(cutoff)
    .fetch_optional(executor)
    .await?;
    Ok(row.is_some())
}

/// Record the terminal delivery outcome from the messaging pipeline.
#[allow(clippy::too_many_arguments)]
pub async fn record_delivery(
    executor: impl SqliteExecutor<'_>,
    id: &str,
    status: &str,
    provider_message_id: Option<&str>,
    cost_cents: Option<i64>,
    error_code: Option<&str>,
    provider_response_json: Option<&str>,
    sent_at: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE message_logs
        SET status = ?, provider_message_id = ?, cost_cents = ?, error_code = ?,
            provider_response_json = ?, sent_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(provider_message_id)
    .bind(cost_cents)
    .bind(error_code)
    .bind(provider_response_json)
    .bind(sent_at)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::person::create_person;
    use crate::test_db;

    #[tokio::test]
    async fn template_lookup_by_name_requires_active() {
        let db = test_db().await;
        let pool = db.pool();
        create_template(pool, "welcome_default", "sms", "Hi {first_name}!", &["first_name".into()], true)
            .await
            .unwrap();
        create_template(pool, "retired", "sms", "old", &[], false)
            .await
            .unwrap();

        assert!(find_active_template_by_name(pool, "welcome_default")
            .await
            .unwrap()
            .is_some());
        assert!(find_active_template_by_name(pool, "retired")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cooldown_lookup_sees_recent_logs_only() {
        let db = test_db().await;
        let pool = db.pool();
        let person = create_person(pool, "Ama", "consented", None, None).await.unwrap();
        let template = create_template(pool, "welcome_default", "sms", "Hi!", &[], true)
            .await
            .unwrap();
        insert_queued_log(pool, "log-1", Some(&person.id), Some(&template.id), "sms", None, None)
            .await
            .unwrap();

        assert!(recent_log_exists(pool, &person.id, &template.id, "2000-01-01T00:00:00.000Z")
            .await
            .unwrap());
        assert!(!recent_log_exists(pool, &person.id, &template.id, "2999-01-01T00:00:00.000Z")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delivery_outcome_is_recorded() {
        let db = test_db().await;
        let pool = db.pool();
        insert_queued_log(pool, "log-1", None, None, "sms", Some("enc"), Some("hash"))
            .await
            .unwrap();
        record_delivery(
            pool,
            "log-1",
            "sent",
            Some("prov-1"),
            Some(4),
            None,
            Some(r#"{"status":"sent"}"#),
            Some(&now_rfc3339()),
        )
        .await
        .unwrap();

        let log = find_log(pool, "log-1").await.unwrap().unwrap();
        assert_eq!(log.status, "sent");
        assert_eq!(log.provider_message_id.as_deref(), Some("prov-1"));
        assert!(log.sent_at.is_some());
    }
}

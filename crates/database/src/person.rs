//! People and consent events.

use sqlx::SqliteExecutor;
use uuid::Uuid;

use crate::models::{ConsentEvent, Person};
use crate::{now_rfc3339, DatabaseError, Result};

/// Insert a new person. Contact values must arrive already encrypted/hashed.
pub async fn create_person(
    executor: impl SqliteExecutor<'_>,
    full_name: &str,
    consent_status: &str,
    phone_enc: Option<&str>,
    phone_hash: Option<&str>,
) -> Result<Person> {
    let now = now_rfc3339();
    let person = Person {
        id: Uuid::new_v4().to_string(),
        full_name: full_name.to_string(),
        consent_status: consent_status.to_string(),
        phone_enc: phone_enc.map(str::to_string),
        phone_hash: phone_hash.map(str::to_string),
        created_at: now.clone(),
        updated_at: now,
    };
    sqlx::query(
        r#"
        INSERT INTO people (id, full_name, consent_status, phone_enc, phone_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&person.id)
    .bind(&person.full_name)
    .bind(&person.consent_status)
    .bind(&person.phone_enc)
    .bind(&person.phone_hash)
    .bind(&person.created_at)
    .bind(&person.updated_at)
    .execute(executor)
    .await?;
    Ok(person)
}

pub async fn get_person(executor: impl SqliteExecutor<'_>, id: &str) -> Result<Person> {
    find_person(executor, id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "person",
            id: id.to_string(),
        })
}

pub async fn find_person(executor: impl SqliteExecutor<'_>, id: &str) -> Result<Option<Person>> {
    let person = sqlx::query_as::<_, Person>(
        r#"
        SELECT id, full_name, consent_status, phone_enc, phone_hash, created_at, updated_at
        FROM people WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(person)
}

pub async fn list_people(executor: impl SqliteExecutor<'_>) -> Result<Vec<Person>> {
    let people = sqlx::query_as::<_, Person>(
        r#"
        SELECT id, full_name, consent_status, phone_enc, phone_hash, created_at, updated_at
        FROM people ORDER BY created_at
        "#,
    )
    .fetch_all(executor)
    .await?;
    Ok(people)
}

/// People with at least one attributed visit; candidates for the welcome rule.
pub async fn list_people_with_visits(executor: impl SqliteExecutor<'_>) -> Result<Vec<Person>> {
    let people = sqlx::query_as::<_, Person>(
        r#"
        SELECT DISTINCT p.id, p.full_name, p.consent_status, p.phone_enc, p.phone_hash,
               p.created_at, p.updated_at
        FROM people p
        JOIN visit_events v ON v.person_id = p.id
        ORDER BY p.created_at
        "#,
    )
    .fetch_all(executor)
    .await?;
    Ok(people)
}

pub async fn update_person_name(
    executor: impl SqliteExecutor<'_>,
    id: &str,
    full_name: &str,
) -> Result<()> {
    sqlx::query("UPDATE people SET full_name = ?, updated_at = ? WHERE id = ?")
        .bind(full_name)
        .bind(now_rfc3339())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Replace (or clear) the stored contact values.
pub async fn update_person_phone(
    executor: impl SqliteExecutor<'_>,
    id: &str,
    phone_enc: Option<&str>,
    phone_hash: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE people SET phone_enc = ?, phone_hash = ?, updated_at = ? WHERE id = ?")
        .bind(phone_enc)
        .bind(phone_hash)
        .bind(now_rfc3339())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn set_consent_status(
    executor: impl SqliteExecutor<'_>,
    id: &str,
    status: &str,
) -> Result<()> {
    sqlx::query("UPDATE people SET consent_status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(now_rfc3339())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Record a consent grant/revocation event.
pub async fn insert_consent_event(
    executor: impl SqliteExecutor<'_>,
    person_id: &str,
    status: &str,
    source: &str,
) -> Result<ConsentEvent> {
    let event = ConsentEvent {
        id: Uuid::new_v4().to_string(),
        person_id: person_id.to_string(),
        status: status.to_string(),
        source: source.to_string(),
        created_at: now_rfc3339(),
    };
    sqlx::query(
        r#"
        INSERT INTO consent_events (id, person_id, status, source, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.id)
    .bind(&event.person_id)
    .bind(&event.status)
    .bind(&event.source)
    .bind(&event.created_at)
    .execute(executor)
    .await?;
    Ok(event)
}

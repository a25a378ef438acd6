//! Enrolled face profiles.

use sqlx::SqliteExecutor;
use uuid::Uuid;

use crate::models::FaceProfile;
use crate::{now_rfc3339, Result};

pub async fn insert_profile(
    executor: impl SqliteExecutor<'_>,
    person_id: &str,
    provider: &str,
    face_id: &str,
    collection_ref: &str,
    status: &str,
    consent_event_id: Option<&str>,
) -> Result<FaceProfile> {
    let profile = FaceProfile {
        id: Uuid::new_v4().to_string(),
        person_id: person_id.to_string(),
        provider: provider.to_string(),
        face_id: face_id.to_string(),
        collection_ref: collection_ref.to_string(),
        status: status.to_string(),
        consent_event_id: consent_event_id.map(str::to_string),
        created_at: now_rfc3339(),
        deleted_at: None,
    };
    sqlx::query(
        r#"
        INSERT INTO face_profiles
            (id, person_id, provider, face_id, collection_ref, status, consent_event_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&profile.id)
    .bind(&profile.person_id)
    .bind(&profile.provider)
    .bind(&profile.face_id)
    .bind(&profile.collection_ref)
    .bind(&profile.status)
    .bind(&profile.consent_event_id)
    .bind(&profile.created_at)
    .execute(executor)
    .await?;
    Ok(profile)
}

/// The active profile holding this exact provider face id, if any. The
/// recognition job uses this to map a match back to a person; a face id
/// whose profile was deleted must not match.
pub async fn find_active_by_face_id(
    executor: impl SqliteExecutor<'_>,
    provider: &str,
    face_id: &str,
) -> Result<Option<FaceProfile>> {
    let profile = sqlx::query_as::<_, FaceProfile>(
        r#"
        SELECT id, person_id, provider, face_id, collection_ref, status,
               consent_event_id, created_at, deleted_at
        FROM face_profiles
        WHERE provider = ? AND face_id = ? AND status = 'active'
        "#,
    )
    .bind(provider)
    .bind(face_id)
    .fetch_optional(executor)
    .await?;
    Ok(profile)
}

pub async fn list_for_person(
    executor: impl SqliteExecutor<'_>,
    person_id: &str,
) -> Result<Vec<FaceProfile>> {
    let profiles = sqlx::query_as::<_, FaceProfile>(
        r#"
        SELECT id, person_id, provider, face_id, collection_ref, status,
               consent_event_id, created_at, deleted_at
        FROM face_profiles WHERE person_id = ? ORDER BY created_at
        "#,
    )
    .bind(person_id)
    .fetch_all(executor)
    .await?;
    Ok(profiles)
}

pub async fn active_for_person(
    executor: impl SqliteExecutor<'_>,
    person_id: &str,
    provider: &str,
) -> Result<Vec<FaceProfile>> {
    let profiles = sqlx::query_as::<_, FaceProfile>(
        r#"
        SELECT id, person_id, provider, face_id, collection_ref, status,
               consent_event_id, created_at, deleted_at
        FROM face_profiles
        WHERE person_id = ? AND provider = ? AND status = 'active'
        ORDER BY created_at
        "#,
    )
    .bind(person_id)
    .bind(provider)
    .fetch_all(executor)
    .await?;
    Ok(profiles)
}

/// Deactivate a person's currently active profiles (re-enrollment path).
pub async fn deactivate_active(
    executor: impl SqliteExecutor<'_>,
    person_id: &str,
    provider: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE face_profiles SET status = 'inactive'
        WHERE person_id = ? AND provider = ? AND status = 'active'
        "#,
    )
    .bind(person_id)
    .bind(provider)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Mark a person's active profiles deleted. Second deletion affects zero
/// rows, which is how face deletion stays idempotent.
pub async fn mark_active_deleted(
    executor: impl SqliteExecutor<'_>,
    person_id: &str,
    provider: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE face_profiles SET status = 'deleted', deleted_at = ?
        WHERE person_id = ? AND provider = ? AND status = 'active'
        "#,
    )
    .bind(now_rfc3339())
    .bind(person_id)
    .bind(provider)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

//! Face enrollment and deletion.

use axum::extract::{Multipart, Path, State};
use axum::{Extension, Json};
use database::{audit, face_profile, person};
use serde_json::json;
use tenant_core::TenantContext;

use crate::error::{ApiError, Result};
use crate::state::AppState;

struct EnrollForm {
    images: Vec<Vec<u8>>,
    consent_confirmed: bool,
}

async fn read_enroll_form(mut multipart: Multipart) -> Result<EnrollForm> {
    let mut images = Vec::new();
    let mut consent_confirmed = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::Validation("malformed multipart body".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "images" | "image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::Validation("unreadable image field".to_string()))?;
                if !bytes.is_empty() {
                    images.push(bytes.to_vec());
                }
            }
            "consent_confirmed" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|_| ApiError::Validation("unreadable multipart field".to_string()))?;
                consent_confirmed = matches!(raw.trim(), "true" | "1");
            }
            _ => {}
        }
    }

    if images.is_empty() {
        return Err(ApiError::Validation("at least one image is required".to_string()));
    }
    Ok(EnrollForm {
        images,
        consent_confirmed,
    })
}

/// Enroll face images for a person at the matching provider.
///
/// Enrollment is a consent-bearing act: a person without prior consent can
/// only be enrolled when the caller explicitly confirms consent, which is
/// recorded as a consent event the new profiles reference. Re-enrollment
/// deactivates earlier active profiles so only the newest set matches.
pub async fn enroll_faces(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let form = read_enroll_form(multipart).await?;

    let db = state.db(&ctx).await?;
    let pool = db.pool();
    let subject = person::find_person(pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("person not found".to_string()))?;

    let needs_consent = subject.consent_status != "consented";
    if needs_consent && !form.consent_confirmed {
        return Err(ApiError::Forbidden("consent required to enroll faces"));
    }

    state.matcher.ensure_collection().await?;
    let enrollment = state.matcher.enroll(&subject.id, &form.images).await?;
    if enrollment.face_ids.is_empty() {
        return Err(ApiError::Validation("no faces detected".to_string()));
    }

    let provider = state.matcher.provider_name().to_string();
    let mut tx = pool.begin().await.map_err(database::DatabaseError::from)?;

    let consent_event_id = if needs_consent {
        person::set_consent_status(&mut *tx, &subject.id, "consented").await?;
        let event =
            person::insert_consent_event(&mut *tx, &subject.id, "consented", "enrollment").await?;
        Some(event.id)
    } else {
        None
    };

    face_profile::deactivate_active(&mut *tx, &subject.id, &provider).await?;
    for (index, face_id) in enrollment.face_ids.iter().enumerate() {
        // The newest enrollment owns matching; extras are kept for audit.
        let status = if index == 0 { "active" } else { "inactive" };
        face_profile::insert_profile(
            &mut *tx,
            &subject.id,
            &provider,
            face_id,
            &ctx.tenant_id,
            status,
            consent_event_id.as_deref(),
        )
        .await?;
    }
    audit::insert_audit_log(
        &mut *tx,
        "staff",
        "face.enroll",
        "person",
        &subject.id,
        Some(&json!({ "face_count": enrollment.face_ids.len(), "provider": provider }).to_string()),
    )
    .await?;
    tx.commit().await.map_err(database::DatabaseError::from)?;

    Ok(Json(json!({
        "person_id": subject.id,
        "face_ids": enrollment.face_ids,
        "warnings": enrollment.warnings,
    })))
}

pub async fn face_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let db = state.db(&ctx).await?;
    let pool = db.pool();
    person::find_person(pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("person not found".to_string()))?;

    let profiles = face_profile::list_for_person(pool, &id).await?;
    let items: Vec<serde_json::Value> = profiles
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "provider": p.provider,
                "status": p.status,
                "created_at": p.created_at,
                "deleted_at": p.deleted_at,
            })
        })
        .collect();
    Ok(Json(json!({ "person_id": id, "items": items })))
}

/// Delete a person's active face profiles at the provider and revoke their
/// consent. Idempotent: a second call finds nothing active and returns an
/// empty list without touching consent again.
pub async fn delete_faces(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let db = state.db(&ctx).await?;
    let pool = db.pool();
    person::find_person(pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("person not found".to_string()))?;

    let provider = state.matcher.provider_name().to_string();
    let active = face_profile::active_for_person(pool, &id, &provider).await?;
    if active.is_empty() {
        return Ok(Json(json!({ "person_id": id, "deleted_ids": [] })));
    }

    let face_ids: Vec<String> = active.iter().map(|p| p.face_id.clone()).collect();
    // Provider deletion first: if it fails nothing local changes and the
    // caller can retry.
    state.matcher.delete_face_ids(&face_ids).await?;

    let mut tx = pool.begin().await.map_err(database::DatabaseError::from)?;
    face_profile::mark_active_deleted(&mut *tx, &id, &provider).await?;
    person::set_consent_status(&mut *tx, &id, "revoked").await?;
    person::insert_consent_event(&mut *tx, &id, "revoked", "delete_faces").await?;
    audit::insert_audit_log(
        &mut *tx,
        "staff",
        "face.delete",
        "person",
        &id,
        Some(&json!({ "deleted_count": face_ids.len(), "provider": provider }).to_string()),
    )
    .await?;
    tx.commit().await.map_err(database::DatabaseError::from)?;

    Ok(Json(json!({ "person_id": id, "deleted_ids": face_ids })))
}

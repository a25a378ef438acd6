//! People and consent management.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use database::{audit, person, Person};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tenant_core::{normalize_phone, TenantContext};

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Person as returned to staff. Contact values stay encrypted server-side;
/// callers only learn whether a number is on file.
#[derive(Serialize)]
pub struct PersonOut {
    pub id: String,
    pub full_name: String,
    pub consent_status: String,
    pub has_phone: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Person> for PersonOut {
    fn from(p: Person) -> Self {
        Self {
            id: p.id,
            full_name: p.full_name,
            consent_status: p.consent_status,
            has_phone: p.phone_enc.is_some(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CreatePersonRequest {
    #[serde(default, alias = "name")]
    full_name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    consent_status: Option<String>,
}

pub async fn create_person(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(payload): Json<CreatePersonRequest>,
) -> Result<Json<PersonOut>> {
    let full_name = payload
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::Validation("full_name is required".to_string()))?;

    let consent_status = match payload.consent_status.as_deref() {
        None => "unknown",
        Some(s @ ("unknown" | "consented" | "revoked")) => s,
        Some(_) => {
            return Err(ApiError::Validation(
                "consent_status must be unknown, consented or revoked".to_string(),
            ))
        }
    };

    let (phone_enc, phone_hash) = match payload.phone.as_deref() {
        Some(raw) => {
            let normalized = normalize_phone(raw)?;
            (
                Some(state.cipher.encrypt(&normalized)),
                Some(state.cipher.hash(&normalized)),
            )
        }
        None => (None, None),
    };

    let db = state.db(&ctx).await?;
    let person = person::create_person(
        db.pool(),
        full_name,
        consent_status,
        phone_enc.as_deref(),
        phone_hash.as_deref(),
    )
    .await?;
    Ok(Json(person.into()))
}

pub async fn list_people(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<serde_json::Value>> {
    let db = state.db(&ctx).await?;
    let people = person::list_people(db.pool()).await?;
    let items: Vec<PersonOut> = people.into_iter().map(PersonOut::from).collect();
    Ok(Json(json!({ "items": items })))
}

pub async fn get_person(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Result<Json<PersonOut>> {
    let db = state.db(&ctx).await?;
    let person = person::find_person(db.pool(), &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("person not found".to_string()))?;
    Ok(Json(person.into()))
}

#[derive(Deserialize)]
pub struct UpdatePersonRequest {
    #[serde(default, alias = "name")]
    full_name: Option<String>,
    /// Absent leaves the number untouched; explicit null clears it.
    #[serde(default, deserialize_with = "present_or_null")]
    phone: Option<Option<String>>,
}

/// Distinguishes a missing field (outer `None`) from an explicit `null`
/// (inner `None`), which plain `Option` cannot.
fn present_or_null<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

pub async fn update_person(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(payload): Json<UpdatePersonRequest>,
) -> Result<Json<PersonOut>> {
    let db = state.db(&ctx).await?;
    let pool = db.pool();
    person::find_person(pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("person not found".to_string()))?;

    if let Some(name) = payload.full_name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(ApiError::Validation("full_name cannot be empty".to_string()));
        }
        person::update_person_name(pool, &id, name).await?;
    }

    match payload.phone {
        None => {}
        Some(None) => {
            person::update_person_phone(pool, &id, None, None).await?;
        }
        Some(Some(raw)) => {
            let normalized = normalize_phone(&raw)?;
            person::update_person_phone(
                pool,
                &id,
                Some(&state.cipher.encrypt(&normalized)),
                Some(&state.cipher.hash(&normalized)),
            )
            .await?;
        }
    }

    let updated = person::get_person(pool, &id).await?;
    Ok(Json(updated.into()))
}

#[derive(Deserialize)]
pub struct ConsentRequest {
    #[serde(default)]
    status: String,
    #[serde(default)]
    source: Option<String>,
}

/// Record a consent decision and its audit trail.
pub async fn update_consent(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(payload): Json<ConsentRequest>,
) -> Result<Json<serde_json::Value>> {
    if !matches!(payload.status.as_str(), "consented" | "revoked") {
        return Err(ApiError::Validation(
            "status must be consented or revoked".to_string(),
        ));
    }
    let source = payload.source.as_deref().unwrap_or("manual");

    let db = state.db(&ctx).await?;
    let pool = db.pool();
    person::find_person(pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("person not found".to_string()))?;

    let mut tx = pool.begin().await.map_err(database::DatabaseError::from)?;
    person::set_consent_status(&mut *tx, &id, &payload.status).await?;
    let event = person::insert_consent_event(&mut *tx, &id, &payload.status, source).await?;
    audit::insert_audit_log(
        &mut *tx,
        "staff",
        "consent.update",
        "person",
        &id,
        Some(&json!({ "status": payload.status, "source": source }).to_string()),
    )
    .await?;
    tx.commit().await.map_err(database::DatabaseError::from)?;

    Ok(Json(json!({
        "person_id": id,
        "consent_status": payload.status,
        "consent_event_id": event.id,
    })))
}

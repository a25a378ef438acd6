//! Rules, rule runs, and follow-up tasks.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use database::{now_rfc3339, rule, Rule};
use serde::Deserialize;
use serde_json::json;
use tenant_core::TenantContext;
use worker::Job;

use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateRuleRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    rule_type: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    config: Option<serde_json::Value>,
}

pub async fn create_rule(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(payload): Json<CreateRuleRequest>,
) -> Result<Json<Rule>> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }
    if !matches!(payload.rule_type.as_str(), "welcome" | "absence") {
        return Err(ApiError::Validation(
            "rule_type must be welcome or absence".to_string(),
        ));
    }
    let status = match payload.status.as_deref() {
        None => "active",
        Some(s @ ("active" | "inactive")) => s,
        Some(_) => {
            return Err(ApiError::Validation(
                "status must be active or inactive".to_string(),
            ))
        }
    };
    let config_json = payload.config.as_ref().map(|v| v.to_string());

    let db = state.db(&ctx).await?;
    let created = rule::create_rule(
        db.pool(),
        payload.name.trim(),
        &payload.rule_type,
        status,
        config_json.as_deref(),
    )
    .await?;
    Ok(Json(created))
}

pub async fn list_rules(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<serde_json::Value>> {
    let db = state.db(&ctx).await?;
    let rules = rule::list_rules(db.pool()).await?;
    Ok(Json(json!({ "items": rules })))
}

/// Queue an execution of a rule; the worker evaluates it asynchronously.
pub async fn run_rule(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let db = state.db(&ctx).await?;
    let pool = db.pool();
    let rule_row = rule::find_rule(pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("rule not found".to_string()))?;

    let run = rule::create_run(pool, &rule_row.id).await?;
    state.queue.dispatch(Job::RunRule {
        tenant_slug: ctx.slug.clone(),
        rule_id: rule_row.id,
        run_id: run.id.clone(),
    });
    Ok(Json(json!({ "run_id": run.id, "status": "queued" })))
}

#[derive(Deserialize)]
pub struct FollowUpQuery {
    #[serde(default)]
    status: Option<String>,
}

pub async fn list_followups(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Query(query): Query<FollowUpQuery>,
) -> Result<Json<serde_json::Value>> {
    let db = state.db(&ctx).await?;
    let tasks = rule::list_tasks(db.pool(), query.status.as_deref()).await?;
    Ok(Json(json!({ "items": tasks })))
}

#[derive(Deserialize)]
pub struct UpdateFollowUpRequest {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    outcome_type: Option<String>,
    #[serde(default)]
    outcome_notes: Option<String>,
}

/// Update a follow-up task's state and optionally record an outcome.
pub async fn update_followup(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateFollowUpRequest>,
) -> Result<Json<serde_json::Value>> {
    let db = state.db(&ctx).await?;
    let pool = db.pool();
    let task = rule::find_task(pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("follow-up task not found".to_string()))?;

    if let Some(status) = payload.status.as_deref() {
        if !matches!(status, "open" | "in_progress" | "closed" | "resolved") {
            return Err(ApiError::Validation(
                "status must be open, in_progress, closed or resolved".to_string(),
            ));
        }
        let closed_at = matches!(status, "closed" | "resolved").then(now_rfc3339);
        rule::update_task_status(pool, &id, status, closed_at.as_deref(), payload.notes.as_deref())
            .await?;
    } else if payload.notes.is_some() {
        rule::update_task_status(pool, &id, &task.status, None, payload.notes.as_deref()).await?;
    }

    let outcome_id = match payload.outcome_type.as_deref() {
        Some(outcome_type) => Some(
            rule::insert_outcome(pool, &id, outcome_type, payload.outcome_notes.as_deref())
                .await?,
        ),
        None => None,
    };

    let updated = rule::find_task(pool, &id)
        .await?
        .ok_or_else(|| ApiError::Internal("task vanished during update".to_string()))?;
    Ok(Json(json!({ "task": updated, "outcome_id": outcome_id })))
}

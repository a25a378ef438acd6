//! Tenant resolution middleware and gate session authentication.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::Response;
use database::{gate, now_rfc3339, GateAgentSession};
use sqlx::SqlitePool;
use tenant_core::sha256_hex;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Paths served without a tenant context.
const OPEN_PATHS: &[&str] = &["/healthz", "/metrics", "/docs", "/openapi"];

fn is_open_path(path: &str) -> bool {
    OPEN_PATHS
        .iter()
        .any(|open| path == *open || path.starts_with(&format!("{open}/")) || path.starts_with(&format!("{open}.")))
}

/// Resolve the request's tenant from the Host subdomain (or, in dev, an
/// `X-Tenant-Slug` header) and stash the [`TenantContext`] in request
/// extensions. CORS preflights and open paths pass through untouched.
///
/// [`TenantContext`]: tenant_core::TenantContext
pub async fn resolve_tenant(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    if req.method() == Method::OPTIONS || is_open_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let slug = slug_from_request(&state, req.headers())?;
    let record = state.registry.get_tenant(&slug).await?;
    let span = tracing::info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        tenant = %record.slug,
        path = %req.uri().path(),
    );
    req.extensions_mut().insert(record.into_context());
    Ok(next.run(req).instrument(span).await)
}

fn slug_from_request(state: &AppState, headers: &HeaderMap) -> Result<String> {
    if state.env.is_dev() {
        if let Some(slug) = headers
            .get("x-tenant-slug")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return Ok(slug.to_ascii_lowercase());
        }
    }

    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Tenant subdomain required".to_string()))?;
    slug_from_host(host)
}

/// Extract the tenant slug from the leftmost Host label. Bare hosts,
/// localhost, and IP literals carry no tenant and are rejected.
fn slug_from_host(host: &str) -> Result<String> {
    let host = host
        .split(':')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let rejected = host.is_empty()
        || host == "localhost"
        || host.parse::<std::net::IpAddr>().is_ok()
        || !host.contains('.');
    if rejected {
        return Err(ApiError::BadRequest("Tenant subdomain required".to_string()));
    }
    let slug = host
        .split('.')
        .next()
        .unwrap_or("")
        .to_string();
    if slug.is_empty() {
        return Err(ApiError::BadRequest("Tenant subdomain required".to_string()));
    }
    Ok(slug)
}

/// Authenticate a gate agent session token from `Authorization: Bearer` or
/// `X-Gate-Session`. Unknown and expired tokens are 401; a revoked session
/// is 403 so agents know to re-bootstrap rather than retry.
pub async fn gate_session(headers: &HeaderMap, pool: &SqlitePool) -> Result<GateAgentSession> {
    let token = bearer_token(headers)
        .or_else(|| {
            headers
                .get("x-gate-session")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .ok_or(ApiError::Unauthorized("gate session token required"))?;

    let session = gate::find_session_by_token_hash(pool, &sha256_hex(token.as_bytes()))
        .await?
        .ok_or(ApiError::Unauthorized("invalid gate session"))?;
    if session.status != "active" {
        return Err(ApiError::Forbidden("gate session revoked"));
    }
    if session.expires_at <= now_rfc3339() {
        return Err(ApiError::Unauthorized("gate session expired"));
    }
    Ok(session)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

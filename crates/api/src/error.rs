//! API error taxonomy.
//!
//! Every handler returns [`ApiError`]; the `IntoResponse` impl maps each
//! variant to a status code and a `{"detail": ...}` body with a fixed
//! vocabulary. Internal failure detail is logged, never sent to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use database::DatabaseError;
use face_matcher::FaceMatchError;
use registry::RegistryError;
use tenant_core::CryptoError;
use tenant_db::TenantDbError;

#[derive(Debug)]
pub enum ApiError {
    /// Malformed request outside body validation, e.g. an unusable Host.
    BadRequest(String),
    Unauthorized(&'static str),
    Forbidden(&'static str),
    NotFound(String),
    Conflict(String),
    /// Request body or parameters failed validation.
    Validation(String),
    RateLimited(&'static str),
    /// A dependency (registry, face provider, secret backend) failed.
    Upstream(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Validation(msg)
            | ApiError::Upstream(msg) => msg,
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::RateLimited(msg) => msg,
            ApiError::Internal(_) => "internal server error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "request failed");
        }
        let body = Json(serde_json::json!({ "detail": self.detail() }));
        (self.status(), body).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, .. } => {
                ApiError::NotFound(format!("{entity} not found"))
            }
            DatabaseError::IdempotencyConflict { .. } => {
                ApiError::Conflict("idempotency key reused with different payload".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => ApiError::NotFound("unknown tenant".to_string()),
            RegistryError::Upstream(detail) => {
                tracing::warn!(detail = %detail, "tenant registry lookup failed");
                ApiError::Upstream("tenant registry unavailable".to_string())
            }
        }
    }
}

impl From<TenantDbError> for ApiError {
    fn from(err: TenantDbError) -> Self {
        match err {
            TenantDbError::SecretUnavailable { secret_ref, .. } => {
                tracing::warn!(secret_ref = %secret_ref, "tenant credentials unavailable");
                ApiError::Upstream("tenant database unavailable".to_string())
            }
            TenantDbError::InvalidCoordinates(detail) => ApiError::Internal(detail),
            TenantDbError::Database(db) => db.into(),
        }
    }
}

impl From<FaceMatchError> for ApiError {
    fn from(err: FaceMatchError) -> Self {
        match err {
            FaceMatchError::NotConfigured { .. } => ApiError::Internal(err.to_string()),
            FaceMatchError::Provider { .. } => {
                tracing::warn!(error = %err, "face provider error");
                ApiError::Upstream("face provider error".to_string())
            }
            FaceMatchError::Transport(_) => {
                tracing::warn!(error = %err, "face provider unreachable");
                ApiError::Upstream("face provider unreachable".to_string())
            }
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidContact => {
                ApiError::Validation("invalid phone number".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

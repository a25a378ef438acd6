//! Tenant-facing HTTP API for Presence.
//!
//! Every `/v1` route runs behind the tenant-resolution middleware in
//! [`tenant`], which turns the request's Host subdomain into a
//! [`TenantContext`]; handlers then open that tenant's database through the
//! shared session manager. Side-effecting work (recognition, SMS delivery,
//! rule runs) is enqueued on the in-process job queue, never done inline.
//!
//! [`TenantContext`]: tenant_core::TenantContext

pub mod error;
pub mod routes;
pub mod settings;
pub mod state;
pub mod tenant;

use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;

pub use settings::Settings;
pub use state::{AppState, GateSettings};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::system::healthz))
        .route("/metrics", get(routes::system::metrics))
        .route("/v1/gate/auth/session", post(routes::gate::auth_session))
        .route("/v1/gate/heartbeat", post(routes::gate::heartbeat))
        .route("/v1/gate/frames", post(routes::gate::submit_frame))
        .route("/v1/messages/send", post(routes::messages::send_message))
        .route("/v1/messages/logs", get(routes::messages::list_logs))
        .route(
            "/v1/templates",
            get(routes::messages::list_templates).post(routes::messages::create_template),
        )
        .route(
            "/v1/people",
            get(routes::people::list_people).post(routes::people::create_person),
        )
        .route(
            "/v1/people/:id",
            get(routes::people::get_person).patch(routes::people::update_person),
        )
        .route("/v1/people/:id/consent", post(routes::people::update_consent))
        .route(
            "/v1/people/:id/faces",
            post(routes::faces::enroll_faces).delete(routes::faces::delete_faces),
        )
        .route("/v1/people/:id/faces/status", get(routes::faces::face_status))
        .route(
            "/v1/rules",
            get(routes::rules::list_rules).post(routes::rules::create_rule),
        )
        .route("/v1/rules/:id/run", post(routes::rules::run_rule))
        .route("/v1/followups", get(routes::rules::list_followups))
        .route("/v1/followups/:id", patch(routes::rules::update_followup))
        .route(
            "/v1/recognition-results",
            get(routes::observability::list_recognition_results),
        )
        .route(
            "/v1/config",
            get(routes::config::get_config).patch(routes::config::patch_config),
        )
        .route("/v1/audit-logs", get(routes::observability::list_audit_logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            tenant::resolve_tenant,
        ))
        .with_state(state)
}

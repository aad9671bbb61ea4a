//! Health check endpoint
//!
//! Besides liveness, reports what a submission would run into: whether a
//! Grist credential is configured and where failed records are kept.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    /// `sqlite` or `memory`
    pub draft_store: String,
    /// Submissions fail before any network call when false
    pub credential_configured: bool,
    pub uptime_seconds: i64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let credential_configured = state.grist.credential().is_ok();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "crsub-relay".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        draft_store: state.drafts.backend().to_string(),
        credential_configured,
        uptime_seconds: (chrono::Utc::now() - state.startup_time).num_seconds(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

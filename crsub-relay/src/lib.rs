//! crsub-relay library
//!
//! HTTP front of the report relay: accepts CRCA/CRFM submissions from the
//! browser, forwards them to Grist and exposes the draft slots.

use axum::Router;
use chrono::{DateTime, Utc};
use crsub_common::upstream::GristClient;
use crsub_common::{DraftStore, GristConfig, SubmissionDispatcher};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<SubmissionDispatcher>,
    /// Client used by the listing proxy
    pub client: Arc<GristClient>,
    pub grist: Arc<GristConfig>,
    pub drafts: Arc<dyn DraftStore>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<SubmissionDispatcher>,
        client: Arc<GristClient>,
        grist: GristConfig,
    ) -> Self {
        let drafts = dispatcher.drafts().clone();
        Self {
            dispatcher,
            client,
            grist: Arc::new(grist),
            drafts,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let api = Router::new()
        .route(
            "/api/grist",
            post(api::submit_records).get(api::list_records),
        )
        .route("/api/escadrons", get(api::list_escadrons))
        .route(
            "/api/drafts/:kind",
            get(api::load_draft)
                .put(api::save_draft)
                .delete(api::clear_draft),
        )
        .route("/api/buildinfo", get(api::get_build_info));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

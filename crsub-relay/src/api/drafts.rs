//! Draft slot endpoints
//!
//! One slot per record kind; the browser saves work in progress here and
//! reloads whatever a failed submission left behind.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use crsub_common::{Draft, FrontendRecord, RecordKind};
use serde_json::Value;
use tracing::info;

use crate::error::ApiError;
use crate::AppState;

/// GET /api/drafts/:kind
pub async fn load_draft(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Draft>, ApiError> {
    let kind: RecordKind = kind.parse()?;

    state
        .drafts
        .load(kind)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No {} draft", kind)))
}

/// PUT /api/drafts/:kind
///
/// Body is the form record object; it replaces the kind's slot.
pub async fn save_draft(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(fields): Json<Value>,
) -> Result<Json<Draft>, ApiError> {
    let kind: RecordKind = kind.parse()?;
    let record = FrontendRecord::from_json(Some(kind), fields)?;

    let draft = state.drafts.save(&record).await?;
    info!(kind = %kind, "Draft saved from browser");
    Ok(Json(draft))
}

/// DELETE /api/drafts/:kind
pub async fn clear_draft(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<StatusCode, ApiError> {
    let kind: RecordKind = kind.parse()?;
    state.drafts.clear(kind).await?;
    Ok(StatusCode::NO_CONTENT)
}

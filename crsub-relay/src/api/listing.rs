//! Read-only listing proxy
//!
//! Forwards `GET .../tables/{table}/records` with the relay's credential so the
//! browser never holds it. Successful upstream JSON is returned unchanged; a
//! rejection keeps its status with a short `{"error", "detail"}` body.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crsub_common::upstream::{
    is_valid_table_name, truncate_detail, MAX_ERROR_DETAIL_LEN, MAX_LOG_LEN,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::AppState;

/// Table listed by `/api/escadrons` when none is given
pub const DEFAULT_ESCADRON_TABLE: &str = "Escadron";

/// Query parameters for listing
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub table: Option<String>,
}

/// GET /api/grist?table=NAME
pub async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let table = query
        .table
        .ok_or_else(|| ApiError::BadRequest("Missing 'table' query parameter".to_string()))?;
    proxy_listing(&state, &table).await
}

/// GET /api/escadrons[?table=NAME]
pub async fn list_escadrons(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let table = query
        .table
        .unwrap_or_else(|| DEFAULT_ESCADRON_TABLE.to_string());
    proxy_listing(&state, &table).await
}

async fn proxy_listing(state: &AppState, table: &str) -> Result<Response, ApiError> {
    // Table names end up in the upstream URL path
    if !is_valid_table_name(table) {
        return Err(ApiError::BadRequest(format!("Invalid table name: {}", table)));
    }

    let credential = state.grist.credential()?;

    let response = state
        .client
        .list_records(table, credential)
        .await
        .map_err(|e| {
            warn!(table, error = %e, "Grist listing failed");
            ApiError::BadGateway(e.to_string())
        })?;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    debug!(table, status = response.status, "Grist listing answered");

    // Failure bodies are replaced, never forwarded at full length
    let body = if response.is_success() {
        serde_json::from_str::<Value>(&response.body).unwrap_or_else(|_| {
            json!({ "error": truncate_detail(&response.body, MAX_ERROR_DETAIL_LEN) })
        })
    } else {
        warn!(
            table,
            status = response.status,
            body = %truncate_detail(&response.body, MAX_LOG_LEN),
            "Grist listing rejected"
        );
        json!({
            "error": format!("Grist {}", response.status),
            "detail": truncate_detail(&response.body, MAX_ERROR_DETAIL_LEN),
        })
    };

    Ok((status, Json(body)).into_response())
}

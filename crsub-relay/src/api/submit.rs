//! Record submission endpoint
//!
//! Accepted bodies:
//! - `{"table": "CRFM", "records": [{...}, {"fields": {...}}]}`
//! - `{"records": [...]}` (kind inferred per record)
//! - `{"table": "CRCA", "fields": {...}}`
//! - a bare record object, or an array of bare records

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::status_for;
use crate::AppState;

/// Response to `POST /api/grist`
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted: Option<Vec<i64>>,
    /// Position in the batch of the record that failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_index: Option<usize>,
    /// Records after the failed one, not attempted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<usize>,
}

impl SubmitResponse {
    fn bad_request(error: String) -> (StatusCode, Json<Self>) {
        (
            StatusCode::BAD_REQUEST,
            Json(Self {
                success: false,
                message: Some("Invalid request".to_string()),
                error: Some(error),
                ..Default::default()
            }),
        )
    }
}

/// Table (if any) and record objects extracted from a request body
#[derive(Debug, PartialEq)]
struct SubmitBatch {
    table: Option<String>,
    records: Vec<Value>,
}

fn parse_batch(body: &[u8]) -> Result<SubmitBatch, String> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON body: {}", e))?;

    let batch = match value {
        Value::Array(records) => SubmitBatch {
            table: None,
            records: records.into_iter().map(unwrap_fields).collect(),
        },
        Value::Object(mut object) => {
            let table = take_table(&mut object)?;
            match object.remove("records") {
                Some(Value::Array(records)) => SubmitBatch {
                    table,
                    records: records.into_iter().map(unwrap_fields).collect(),
                },
                Some(_) => return Err("'records' must be an array".to_string()),
                None => SubmitBatch {
                    table,
                    records: vec![unwrap_fields(Value::Object(object))],
                },
            }
        }
        _ => return Err("Body must be a JSON object or array".to_string()),
    };

    if batch.records.is_empty() {
        return Err("No records to submit".to_string());
    }
    Ok(batch)
}

fn take_table(object: &mut Map<String, Value>) -> Result<Option<String>, String> {
    match object.remove("table") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(table)) if table.trim().is_empty() => Ok(None),
        Some(Value::String(table)) => Ok(Some(table)),
        Some(_) => Err("'table' must be a string".to_string()),
    }
}

/// `{"fields": {...}}` → `{...}`; anything else is taken as the record itself
fn unwrap_fields(value: Value) -> Value {
    match value {
        Value::Object(mut object) if matches!(object.get("fields"), Some(Value::Object(_))) => {
            object.remove("fields").unwrap_or(Value::Object(object))
        }
        other => other,
    }
}

/// POST /api/grist
///
/// Records are submitted in order and the batch stops at the first failure.
/// The response then carries the ids already inserted, the index of the
/// failed record and how many records after it were not attempted.
pub async fn submit_records(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<SubmitResponse>) {
    let batch = match parse_batch(&body) {
        Ok(batch) => batch,
        Err(e) => {
            warn!(error = %e, "Rejected submission body");
            return SubmitResponse::bad_request(e);
        }
    };

    let total = batch.records.len();
    let mut inserted = Vec::new();

    for (index, record) in batch.records.into_iter().enumerate() {
        let result = state
            .dispatcher
            .submit_json(batch.table.as_deref(), record)
            .await;

        if !result.success {
            let status = result
                .error
                .as_ref()
                .map(status_for)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            warn!(
                index,
                total,
                status = status.as_u16(),
                "Batch stopped at failed record"
            );
            return (
                status,
                Json(SubmitResponse {
                    success: false,
                    message: Some(result.message),
                    error: result.error_detail,
                    inserted: (!inserted.is_empty()).then_some(inserted),
                    failed_index: Some(index),
                    remaining: Some(total - index - 1),
                }),
            );
        }

        inserted.extend(result.external_ids.unwrap_or_default());
    }

    info!(records = total, "Batch submitted");
    (
        StatusCode::OK,
        Json(SubmitResponse {
            success: true,
            message: Some(format!("{} record(s) added", total)),
            inserted: Some(inserted),
            ..Default::default()
        }),
    )
}

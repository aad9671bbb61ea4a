//! Error types for crsub-relay

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crsub_common::Error;
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Grist could not be reached (502)
    #[error("Upstream unreachable: {0}")]
    BadGateway(String),

    /// crsub-common error, status chosen by [`status_for`]
    #[error(transparent)]
    Common(#[from] Error),
}

/// HTTP status reported for a relay error
///
/// Input errors are 400, a missing credential and exhausted retries are 500,
/// terminal upstream rejections keep the upstream status.
pub fn status_for(error: &Error) -> StatusCode {
    if error.is_client_error() {
        return StatusCode::BAD_REQUEST;
    }
    match error {
        Error::TerminalUpstreamFailure { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_code(error: &Error) -> &'static str {
    match error {
        Error::MissingCredential => "MISSING_CREDENTIAL",
        Error::UnknownRecordKind(_) => "UNKNOWN_RECORD_KIND",
        Error::UnsupportedTable(_) => "UNSUPPORTED_TABLE",
        Error::AmbiguousRecordKind(_) => "AMBIGUOUS_RECORD_KIND",
        Error::EmptyMappedRecord(_) => "EMPTY_RECORD",
        Error::TransientUpstreamFailure { .. } => "UPSTREAM_UNAVAILABLE",
        Error::TerminalUpstreamFailure { .. } => "UPSTREAM_REJECTED",
        Error::InvalidInput(_) => "BAD_REQUEST",
        Error::Config(_) | Error::Database(_) | Error::Io(_) | Error::Json(_) => "INTERNAL_ERROR",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY", msg),
            ApiError::Common(ref err) => (status_for(err), error_code(err), err.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

//! Common error types for crsub

use thiserror::Error;

/// Common result type for crsub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the dispatcher, the draft store and the relay
#[derive(Error, Debug)]
pub enum Error {
    /// No bearer credential configured; raised before any network call
    #[error("Missing credential: GRIST_API_KEY is not configured")]
    MissingCredential,

    /// Record kind code outside {CRCA, CRFM}
    #[error("Unknown record kind: {0}")]
    UnknownRecordKind(String),

    /// Requested table does not match any registered record kind
    #[error("Table {0} not supported")]
    UnsupportedTable(String),

    /// Kind omitted and not inferable from the record content
    #[error("Cannot determine record kind: {0}")]
    AmbiguousRecordKind(String),

    /// Mapping produced no column to submit
    #[error("Nothing to submit: no {0} field carries a value")]
    EmptyMappedRecord(String),

    /// Retryable upstream failure (429/5xx or network), surfaced after retries
    #[error("Upstream unavailable after {attempts} attempt(s): {detail}")]
    TransientUpstreamFailure {
        attempts: u32,
        status: Option<u16>,
        detail: String,
    },

    /// Non-retryable upstream rejection
    #[error("Upstream rejected the request with status {status}: {detail}")]
    TerminalUpstreamFailure { status: u16, detail: String },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors caused by the submitted input rather than the relay or upstream
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownRecordKind(_)
                | Error::UnsupportedTable(_)
                | Error::AmbiguousRecordKind(_)
                | Error::EmptyMappedRecord(_)
                | Error::InvalidInput(_)
        )
    }

    /// Upstream HTTP status attached to the error, if any
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Error::TransientUpstreamFailure { status, .. } => *status,
            Error::TerminalUpstreamFailure { status, .. } => Some(*status),
            _ => None,
        }
    }
}

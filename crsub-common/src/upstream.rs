//! Grist REST client
//!
//! Thin transport over the document's `tables/{table}/records` endpoint. It
//! reports raw status and body; deciding what is retryable is the
//! dispatcher's job.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::mapper::ExternalRecord;

const USER_AGENT: &str = concat!("crsub/", env!("CARGO_PKG_VERSION"));

/// Upper bound for upstream bodies kept in error details
pub const MAX_ERROR_DETAIL_LEN: usize = 300;

/// Upper bound for upstream bodies written to logs
pub const MAX_LOG_LEN: usize = 500;

/// Transport-level failure (no HTTP status received)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Raw upstream answer
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// `{"fields": {...}}`
#[derive(Debug, Clone, Serialize)]
pub struct RecordEntry {
    pub fields: ExternalRecord,
}

/// Bulk-insert body: `{"records": [{"fields": {...}}]}`
#[derive(Debug, Clone, Serialize)]
pub struct RecordsEnvelope {
    pub records: Vec<RecordEntry>,
}

impl RecordsEnvelope {
    pub fn single(fields: ExternalRecord) -> Self {
        Self {
            records: vec![RecordEntry { fields }],
        }
    }
}

/// Destination of mapped records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// POST one envelope to `table`, authenticated with `credential`
    async fn insert_records(
        &self,
        table: &str,
        credential: &str,
        envelope: &RecordsEnvelope,
    ) -> Result<UpstreamResponse, TransportError>;
}

/// reqwest-backed Grist document client
pub struct GristClient {
    http_client: reqwest::Client,
    server: String,
    doc_id: String,
    timeout: Duration,
}

impl GristClient {
    /// Build a client with a hard per-request timeout
    pub fn new(server: &str, doc_id: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            server: server.trim_end_matches('/').to_string(),
            doc_id: doc_id.to_string(),
            timeout,
        })
    }

    /// `{server}/api/docs/{docId}/tables/{table}/records`
    pub fn records_url(&self, table: &str) -> String {
        format!(
            "{}/api/docs/{}/tables/{}/records",
            self.server, self.doc_id, table
        )
    }

    /// GET every record of `table`
    pub async fn list_records(
        &self,
        table: &str,
        credential: &str,
    ) -> Result<UpstreamResponse, TransportError> {
        let url = self.records_url(table);
        tracing::debug!(%url, "Listing Grist records");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(credential)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.read_response(response).await
    }

    async fn read_response(
        &self,
        response: reqwest::Response,
    ) -> Result<UpstreamResponse, TransportError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(UpstreamResponse { status, body })
    }

    fn transport_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl RecordSink for GristClient {
    async fn insert_records(
        &self,
        table: &str,
        credential: &str,
        envelope: &RecordsEnvelope,
    ) -> Result<UpstreamResponse, TransportError> {
        let url = self.records_url(table);
        tracing::debug!(%url, records = envelope.records.len(), "Posting records to Grist");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(credential)
            .json(envelope)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.read_response(response).await
    }
}

/// Grist table identifiers: ASCII letters, digits and underscores, 1 to 100 chars
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 100
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Cut `text` to at most `max_chars` characters, marking the cut
pub fn truncate_detail(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::map_record;
    use crate::record::FrontendRecord;
    use crate::schema::RecordKind;
    use serde_json::json;

    #[test]
    fn test_client_creation() {
        let client = GristClient::new("https://grist.example.org/", "doc42", Duration::from_secs(15));
        assert!(client.is_ok());
    }

    #[test]
    fn test_records_url() {
        let client =
            GristClient::new("https://grist.example.org/", "doc42", Duration::from_secs(15))
                .unwrap();
        assert_eq!(
            client.records_url("CRFM"),
            "https://grist.example.org/api/docs/doc42/tables/CRFM/records"
        );
    }

    #[test]
    fn test_envelope_shape() {
        let record =
            FrontendRecord::from_json(Some(RecordKind::Crca), json!({"lieu": "Port"})).unwrap();
        let envelope = RecordsEnvelope::single(map_record(&record));

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"records": [{"fields": {"Lieu": "Port", "Traite": false}}]})
        );
    }

    #[test]
    fn test_truncate_detail() {
        assert_eq!(truncate_detail("short", 300), "short");

        let long = "é".repeat(400);
        let cut = truncate_detail(&long, 300);
        assert_eq!(cut.chars().count(), 301);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("Escadron"));
        assert!(is_valid_table_name("CRFM_2025"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("CRFM/../docs"));
        assert!(!is_valid_table_name("Table name"));
        assert!(!is_valid_table_name(&"A".repeat(101)));
    }

    #[test]
    fn test_response_success_range() {
        let ok = UpstreamResponse { status: 201, body: String::new() };
        let bad = UpstreamResponse { status: 302, body: String::new() };
        assert!(ok.is_success());
        assert!(!bad.is_success());
    }
}

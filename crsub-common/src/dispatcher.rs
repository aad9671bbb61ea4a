//! Submission dispatcher
//!
//! Drives one record from validation to the Grist table:
//! resolve kind → credential check → map → POST with retry → result.
//!
//! Any failure that happens once the kind is known keeps the original record
//! as that kind's draft, unless the record carries nothing to map; a success
//! clears it.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::{GristConfig, TableNames};
use crate::draft::DraftStore;
use crate::mapper::{map_record, vocabulary_warnings};
use crate::record::FrontendRecord;
use crate::upstream::{
    truncate_detail, RecordSink, RecordsEnvelope, UpstreamResponse, MAX_ERROR_DETAIL_LEN,
    MAX_LOG_LEN,
};
use crate::{Error, Result};

/// Statuses worth another attempt
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Bounded linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,
    /// Wait after attempt `i` is `i × backoff_step`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    pub fn is_retryable_status(status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }
}

/// Outcome of one submission, as reported to the browser
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Typed failure, used by the HTTP layer to pick a status code
    #[serde(skip)]
    pub error: Option<Error>,
}

impl SubmissionResult {
    fn succeeded(table: &str, ids: Vec<i64>) -> Self {
        Self {
            success: true,
            message: format!("Record added to table {}", table),
            external_ids: Some(ids),
            error_detail: None,
            error: None,
        }
    }

    fn failed(error: Error, draft_saved: bool) -> Self {
        let message = if draft_saved {
            "Submission failed, record kept as draft".to_string()
        } else {
            "Submission failed".to_string()
        };
        Self {
            success: false,
            message,
            external_ids: None,
            error_detail: Some(error.to_string()),
            error: Some(error),
        }
    }
}

/// Validates, maps and submits form records
pub struct SubmissionDispatcher {
    grist: GristConfig,
    sink: Arc<dyn RecordSink>,
    drafts: Arc<dyn DraftStore>,
    retry: RetryPolicy,
}

impl SubmissionDispatcher {
    pub fn new(
        grist: GristConfig,
        sink: Arc<dyn RecordSink>,
        drafts: Arc<dyn DraftStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            grist,
            sink,
            drafts,
            retry,
        }
    }

    pub fn tables(&self) -> &TableNames {
        &self.grist.tables
    }

    pub fn drafts(&self) -> &Arc<dyn DraftStore> {
        &self.drafts
    }

    /// Submit a raw JSON record, optionally aimed at a named table
    ///
    /// Errors raised before the kind is known (unsupported table, ambiguous
    /// or malformed record) are returned without touching the draft store.
    pub async fn submit_json(&self, table: Option<&str>, fields: Value) -> SubmissionResult {
        let kind = match table {
            Some(table) => match self.grist.tables.kind_for_table(table) {
                Ok(kind) => Some(kind),
                Err(e) => {
                    warn!(table, "Rejected submission for unsupported table");
                    return SubmissionResult::failed(e, false);
                }
            },
            None => None,
        };

        match FrontendRecord::from_json(kind, fields) {
            Ok(record) => self.submit(record).await,
            Err(e) => {
                warn!(error = %e, "Rejected submission");
                SubmissionResult::failed(e, false)
            }
        }
    }

    /// Submit a validated record to its kind's table
    pub async fn submit(&self, record: FrontendRecord) -> SubmissionResult {
        let kind = record.kind();
        let table = self.grist.tables.table_for(kind).to_string();
        let span = tracing::info_span!(
            "submission",
            submission_id = %uuid::Uuid::new_v4(),
            kind = %kind,
            table = %table
        );

        async {
            match self.try_submit(&record, &table).await {
                Ok(ids) => {
                    info!(ids = ?ids, "Record submitted");
                    if let Err(e) = self.drafts.clear(kind).await {
                        warn!(error = %e, "Submitted record but failed to clear draft");
                    }
                    SubmissionResult::succeeded(&table, ids)
                }
                Err(e) => {
                    error!(error = %e, "Submission failed");
                    let draft_saved = self.keep_as_draft(&record, &e).await;
                    SubmissionResult::failed(e, draft_saved)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Save the record in its kind's slot after a failure
    ///
    /// A record with nothing to map never replaces the slot, so an empty
    /// submission cannot wipe a draft the user is still working on.
    async fn keep_as_draft(&self, record: &FrontendRecord, error: &Error) -> bool {
        if matches!(error, Error::EmptyMappedRecord(_)) || map_record(record).data_len() == 0 {
            debug!("Nothing to keep, draft slot left untouched");
            return false;
        }

        match self.drafts.save(record).await {
            Ok(_) => {
                info!("Record kept as draft");
                true
            }
            Err(draft_err) => {
                error!(error = %draft_err, "Failed to save draft");
                false
            }
        }
    }

    async fn try_submit(&self, record: &FrontendRecord, table: &str) -> Result<Vec<i64>> {
        let credential = self.grist.credential()?;

        for warning in vocabulary_warnings(record) {
            warn!(%warning, "Unexpected value");
        }

        let mapped = map_record(record);
        if mapped.data_len() == 0 {
            return Err(Error::EmptyMappedRecord(record.kind().to_string()));
        }
        debug!(columns = mapped.data_len(), "Record mapped");

        let envelope = RecordsEnvelope::single(mapped);
        let response = self.send_with_retry(table, credential, &envelope).await?;

        Ok(parse_inserted_ids(&response.body))
    }

    /// POST until success, a terminal status or the attempt budget runs out
    async fn send_with_retry(
        &self,
        table: &str,
        credential: &str,
        envelope: &RecordsEnvelope,
    ) -> Result<UpstreamResponse> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if attempt > 1 {
                debug!(attempt, "Retrying Grist insert");
            }

            let (status, detail) = match self.sink.insert_records(table, credential, envelope).await
            {
                Ok(response) if response.is_success() => {
                    if attempt > 1 {
                        info!(attempt, "Grist insert succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    warn!(
                        attempt,
                        status = response.status,
                        body = %truncate_detail(&response.body, MAX_LOG_LEN),
                        "Grist rejected insert"
                    );
                    let detail = truncate_detail(&response.body, MAX_ERROR_DETAIL_LEN);
                    if !RetryPolicy::is_retryable_status(response.status) {
                        return Err(Error::TerminalUpstreamFailure {
                            status: response.status,
                            detail,
                        });
                    }
                    (Some(response.status), detail)
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Grist insert transport failure");
                    (None, e.to_string())
                }
            };

            if attempt >= max_attempts {
                error!(attempt, "Grist insert failed: attempts exhausted");
                return Err(Error::TransientUpstreamFailure {
                    attempts: attempt,
                    status,
                    detail,
                });
            }

            tokio::time::sleep(self.retry.delay_after(attempt)).await;
        }
    }
}

/// Identifiers from `{"records":[{"id":N}]}` or `{"ids":[N]}`
///
/// A 2xx body that does not parse yields no identifiers.
fn parse_inserted_ids(body: &str) -> Vec<i64> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        warn!(body = %truncate_detail(body, MAX_LOG_LEN), "Unreadable Grist insert response");
        return Vec::new();
    };

    if let Some(records) = value.get("records").and_then(Value::as_array) {
        return records
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect();
    }

    value
        .get("ids")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::MemoryDraftStore;
    use crate::schema::RecordKind;
    use crate::upstream::TransportError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Sink answering from a script; repeats the last answer once drained
    struct ScriptedSink {
        script: Mutex<VecDeque<std::result::Result<UpstreamResponse, TransportError>>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedSink {
        fn new(statuses: &[u16]) -> Arc<Self> {
            let script = statuses
                .iter()
                .map(|status| {
                    Ok(UpstreamResponse {
                        status: *status,
                        body: if (200..300).contains(status) {
                            r#"{"records":[{"id":41}]}"#.to_string()
                        } else {
                            "upstream says no".to_string()
                        },
                    })
                })
                .collect();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing_transport() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::from([Err(TransportError::Network(
                    "connection refused".to_string(),
                ))])),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RecordSink for ScriptedSink {
        async fn insert_records(
            &self,
            table: &str,
            _credential: &str,
            envelope: &RecordsEnvelope,
        ) -> std::result::Result<UpstreamResponse, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((table.to_string(), serde_json::to_value(envelope).unwrap()));

            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().map(|answer| match answer {
                    Ok(response) => Ok(response.clone()),
                    Err(TransportError::Network(m)) => Err(TransportError::Network(m.clone())),
                    Err(TransportError::Timeout(d)) => Err(TransportError::Timeout(*d)),
                })
            };
            next.unwrap_or_else(|| Err(TransportError::Network("empty script".to_string())))
        }
    }

    fn grist(api_key: Option<&str>) -> GristConfig {
        GristConfig {
            api_key: api_key.map(str::to_string),
            ..Default::default()
        }
    }

    fn dispatcher(
        sink: Arc<ScriptedSink>,
        api_key: Option<&str>,
    ) -> (SubmissionDispatcher, Arc<MemoryDraftStore>) {
        let drafts = Arc::new(MemoryDraftStore::new());
        let dispatcher =
            SubmissionDispatcher::new(grist(api_key), sink, drafts.clone(), RetryPolicy::default());
        (dispatcher, drafts)
    }

    fn crfm() -> FrontendRecord {
        FrontendRecord::from_json(
            Some(RecordKind::Crfm),
            json!({"secteur": "ALPHA", "effectifs": "12"}),
        )
        .unwrap()
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert!(RetryPolicy::is_retryable_status(429));
        assert!(RetryPolicy::is_retryable_status(503));
        assert!(!RetryPolicy::is_retryable_status(501));
        assert!(!RetryPolicy::is_retryable_status(404));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_503_exhausts_three_attempts() {
        let sink = ScriptedSink::new(&[503]);
        let (dispatcher, drafts) = dispatcher(sink.clone(), Some("key"));

        let started = tokio::time::Instant::now();
        let result = dispatcher.submit(crfm()).await;

        assert!(!result.success);
        assert_eq!(sink.call_count(), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(matches!(
            result.error,
            Some(Error::TransientUpstreamFailure { attempts: 3, status: Some(503), .. })
        ));
        assert!(drafts.load(RecordKind::Crfm).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_retried() {
        let sink = ScriptedSink::failing_transport();
        let (dispatcher, _drafts) = dispatcher(sink.clone(), Some("key"));

        let result = dispatcher.submit(crfm()).await;

        assert_eq!(sink.call_count(), 3);
        assert!(matches!(
            result.error,
            Some(Error::TransientUpstreamFailure { status: None, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let sink = ScriptedSink::new(&[503, 200]);
        let (dispatcher, _drafts) = dispatcher(sink.clone(), Some("key"));

        let result = dispatcher.submit(crfm()).await;

        assert!(result.success);
        assert_eq!(sink.call_count(), 2);
        assert_eq!(result.external_ids, Some(vec![41]));
    }

    #[tokio::test]
    async fn test_400_is_terminal_and_keeps_draft() {
        let sink = ScriptedSink::new(&[400]);
        let (dispatcher, drafts) = dispatcher(sink.clone(), Some("key"));

        let record = crfm();
        let result = dispatcher.submit(record.clone()).await;

        assert!(!result.success);
        assert_eq!(sink.call_count(), 1);
        assert!(matches!(
            result.error,
            Some(Error::TerminalUpstreamFailure { status: 400, .. })
        ));
        assert_eq!(result.error_detail.as_deref().map(|d| d.contains("upstream says no")), Some(true));

        let draft = drafts.load(RecordKind::Crfm).await.unwrap().unwrap();
        assert_eq!(draft.record, record);
    }

    #[tokio::test]
    async fn test_missing_credential_makes_no_call() {
        let sink = ScriptedSink::new(&[200]);
        let (dispatcher, drafts) = dispatcher(sink.clone(), None);

        let result = dispatcher.submit(crfm()).await;

        assert!(!result.success);
        assert_eq!(sink.call_count(), 0);
        assert!(matches!(result.error, Some(Error::MissingCredential)));
        assert!(drafts.load(RecordKind::Crfm).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_success_clears_draft_and_posts_envelope() {
        let sink = ScriptedSink::new(&[200]);
        let (dispatcher, drafts) = dispatcher(sink.clone(), Some("key"));
        drafts.save(&crfm()).await.unwrap();

        let result = dispatcher.submit(crfm()).await;

        assert!(result.success);
        assert!(drafts.load(RecordKind::Crfm).await.unwrap().is_none());

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls[0].0, "CRFM");
        assert_eq!(
            calls[0].1,
            json!({"records": [{"fields": {"Secteur": "ALPHA", "Effectifs": 12, "Traite": false}}]})
        );
    }

    #[tokio::test]
    async fn test_empty_record_is_rejected_before_network() {
        let sink = ScriptedSink::new(&[200]);
        let (dispatcher, _drafts) = dispatcher(sink.clone(), Some("key"));

        let empty = FrontendRecord::from_json(Some(RecordKind::Crca), json!({"lieu": ""})).unwrap();
        let result = dispatcher.submit(empty).await;

        assert_eq!(sink.call_count(), 0);
        assert!(matches!(result.error, Some(Error::EmptyMappedRecord(_))));
    }

    #[tokio::test]
    async fn test_empty_submission_keeps_existing_draft() {
        let sink = ScriptedSink::new(&[200]);
        let (dispatcher, drafts) = dispatcher(sink.clone(), Some("key"));
        let work_in_progress = FrontendRecord::from_json(
            Some(RecordKind::Crca),
            json!({"lieu": "Gare", "resume": "long text"}),
        )
        .unwrap();
        drafts.save(&work_in_progress).await.unwrap();

        let result = dispatcher
            .submit_json(Some("CRCA"), json!({"indicatifs": ["", ""]}))
            .await;

        assert!(!result.success);
        assert!(matches!(result.error, Some(Error::EmptyMappedRecord(_))));
        assert_eq!(result.message, "Submission failed");
        assert_eq!(sink.call_count(), 0);
        let draft = drafts.load(RecordKind::Crca).await.unwrap().unwrap();
        assert_eq!(draft.record, work_in_progress);
    }

    #[tokio::test]
    async fn test_empty_submission_without_credential_keeps_existing_draft() {
        let sink = ScriptedSink::new(&[200]);
        let (dispatcher, drafts) = dispatcher(sink.clone(), None);
        drafts.save(&crfm()).await.unwrap();

        let empty = FrontendRecord::from_json(Some(RecordKind::Crfm), json!({"effectifs": ""}))
            .unwrap();
        let result = dispatcher.submit(empty).await;

        assert!(matches!(result.error, Some(Error::MissingCredential)));
        assert_eq!(drafts.load(RecordKind::Crfm).await.unwrap().unwrap().record, crfm());
    }

    #[tokio::test]
    async fn test_submit_json_unsupported_table_skips_draft() {
        let sink = ScriptedSink::new(&[200]);
        let (dispatcher, drafts) = dispatcher(sink.clone(), Some("key"));

        let result = dispatcher
            .submit_json(Some("Escadron"), json!({"lieu": "Port"}))
            .await;

        assert!(matches!(result.error, Some(Error::UnsupportedTable(_))));
        assert_eq!(sink.call_count(), 0);
        assert!(drafts.load(RecordKind::Crca).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submit_json_infers_kind() {
        let sink = ScriptedSink::new(&[200]);
        let (dispatcher, _drafts) = dispatcher(sink.clone(), Some("key"));

        let result = dispatcher
            .submit_json(None, json!({"intervention": "CIC", "lieu": "Port"}))
            .await;

        assert!(result.success);
        assert_eq!(sink.calls.lock().unwrap()[0].0, "CRCA");
    }

    #[test]
    fn test_parse_inserted_ids() {
        assert_eq!(parse_inserted_ids(r#"{"records":[{"id":3},{"id":4}]}"#), vec![3, 4]);
        assert_eq!(parse_inserted_ids(r#"{"ids":[7]}"#), vec![7]);
        assert!(parse_inserted_ids("not json").is_empty());
    }

    #[test]
    fn test_result_serialization() {
        let ok = SubmissionResult::succeeded("CRCA", vec![5]);
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["externalIds"], json!([5]));
        assert!(value.get("errorDetail").is_none());
        assert!(value.get("error").is_none());
    }
}

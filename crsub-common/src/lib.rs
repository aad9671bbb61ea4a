//! # crsub common library
//!
//! Core of the report relay shared by the HTTP service:
//! - Schema registry (record kinds and their Grist columns)
//! - Form record validation and kind inference
//! - Field mapping to Grist column records
//! - Grist REST client
//! - Submission dispatch with retry and draft fallback
//! - Draft persistence
//! - Configuration loading

pub mod config;
pub mod dispatcher;
pub mod draft;
pub mod error;
pub mod mapper;
pub mod record;
pub mod schema;
pub mod upstream;

pub use config::{GristConfig, RelayConfig, TableNames};
pub use dispatcher::{RetryPolicy, SubmissionDispatcher, SubmissionResult};
pub use draft::{Draft, DraftStore, MemoryDraftStore, SqliteDraftStore};
pub use error::{Error, Result};
pub use record::FrontendRecord;
pub use schema::RecordKind;

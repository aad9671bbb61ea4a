//! Draft store
//!
//! One slot per record kind (`crca_brouillon`, `crfm_brouillon`). A save
//! replaces the slot; the last write wins. Drafts survive restarts when the
//! SQLite store is used.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::record::FrontendRecord;
use crate::schema::RecordKind;
use crate::{Error, Result};

/// Saved, not yet submitted record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub kind: RecordKind,
    pub record: FrontendRecord,
    pub saved_at: DateTime<Utc>,
}

impl Draft {
    pub fn new(record: FrontendRecord) -> Self {
        Self {
            kind: record.kind(),
            record,
            saved_at: Utc::now(),
        }
    }
}

/// Per-kind draft persistence
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Replace the slot of the record's kind
    async fn save(&self, record: &FrontendRecord) -> Result<Draft>;

    async fn load(&self, kind: RecordKind) -> Result<Option<Draft>>;

    /// Empty the slot; clearing an empty slot is not an error
    async fn clear(&self, kind: RecordKind) -> Result<()>;

    /// Short backend name reported by the health endpoint
    fn backend(&self) -> &'static str;
}

/// SQLite-backed store
pub struct SqliteDraftStore {
    pool: SqlitePool,
}

impl SqliteDraftStore {
    /// Open (creating when needed) the drafts database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let newly_created = !path.exists();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&db_url)
            .await?;

        if newly_created {
            info!("Initialized new drafts database: {}", path.display());
        } else {
            info!("Opened existing drafts database: {}", path.display());
        }

        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await?;

        Self::new(pool).await
    }

    /// Wrap an existing pool, creating the table if needed
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS drafts (
                key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DraftStore for SqliteDraftStore {
    async fn save(&self, record: &FrontendRecord) -> Result<Draft> {
        let draft = Draft::new(record.clone());
        let payload = serde_json::to_string(&draft.record)?;

        sqlx::query(
            "INSERT OR REPLACE INTO drafts (key, kind, payload, saved_at) VALUES (?, ?, ?, ?)",
        )
        .bind(draft.kind.draft_key())
        .bind(draft.kind.code())
        .bind(payload)
        .bind(draft.saved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(kind = %draft.kind, "Draft saved");
        Ok(draft)
    }

    async fn load(&self, kind: RecordKind) -> Result<Option<Draft>> {
        let row = sqlx::query("SELECT payload, saved_at FROM drafts WHERE key = ?")
            .bind(kind.draft_key())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.get("payload");
        let saved_at: String = row.get("saved_at");

        let record: FrontendRecord = serde_json::from_str(&payload)?;
        let saved_at = DateTime::parse_from_rfc3339(&saved_at)
            .map_err(|e| Error::InvalidInput(format!("corrupt draft timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(Draft {
            kind,
            record,
            saved_at,
        }))
    }

    async fn clear(&self, kind: RecordKind) -> Result<()> {
        sqlx::query("DELETE FROM drafts WHERE key = ?")
            .bind(kind.draft_key())
            .execute(&self.pool)
            .await?;
        debug!(kind = %kind, "Draft cleared");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

/// Process-local store, lost on restart
#[derive(Default)]
pub struct MemoryDraftStore {
    slots: RwLock<HashMap<RecordKind, Draft>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn save(&self, record: &FrontendRecord) -> Result<Draft> {
        let draft = Draft::new(record.clone());
        self.slots.write().await.insert(draft.kind, draft.clone());
        Ok(draft)
    }

    async fn load(&self, kind: RecordKind) -> Result<Option<Draft>> {
        Ok(self.slots.read().await.get(&kind).cloned())
    }

    async fn clear(&self, kind: RecordKind) -> Result<()> {
        self.slots.write().await.remove(&kind);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

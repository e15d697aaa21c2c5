//! Durable record storage.
//!
//! The capture engine hands over a logical type plus the session's raw
//! field bag; this layer owns the type-specific normalization (free-text
//! datetime into date + time, priority words, assignee defaulting) and
//! the create-vs-update calls. The create-at-most-once discipline is
//! enforced by the engine's saved-record bookkeeping, not here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;
use uuid::Uuid;

use inkwasp_schema::{FieldValue, LogicalType, Priority, RecordId};

pub mod normalize;

use normalize::NormalizedRecord;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record, returning its identifier.
    async fn create(
        &self,
        logical_type: LogicalType,
        fields: &HashMap<String, FieldValue>,
        actor_id: &str,
    ) -> Result<RecordId>;

    /// Overwrite an existing record with the session's current fields.
    async fn update(
        &self,
        record_id: &RecordId,
        logical_type: LogicalType,
        fields: &HashMap<String, FieldValue>,
        actor_id: &str,
    ) -> Result<()>;
}

/// A persisted record as stored, used by diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub kind: LogicalType,
    pub title: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub event_time: Option<NaiveTime>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub detail: serde_json::Value,
    pub created_by: String,
}

#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id         TEXT PRIMARY KEY,
                kind       TEXT NOT NULL,
                title      TEXT,
                event_date TEXT,
                event_time TEXT,
                priority   TEXT,
                assignee   TEXT,
                detail     TEXT NOT NULL DEFAULT '{}',
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);
            "#,
        )?;
        Ok(())
    }

    pub async fn get(&self, record_id: &str) -> Result<Option<StoredRecord>> {
        let db = Arc::clone(&self.db);
        let record_id = record_id.to_string();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let row = conn
                .query_row(
                    r#"
                    SELECT id, kind, title, event_date, event_time, priority,
                           assignee, detail, created_by
                    FROM records WHERE id = ?1
                    "#,
                    params![record_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, String>(7)?,
                            row.get::<_, String>(8)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, kind, title, date, time, priority, assignee, detail, created_by)) = row
            else {
                return Ok(None);
            };

            Ok(Some(StoredRecord {
                id,
                kind: kind
                    .parse()
                    .map_err(|_| anyhow!("corrupt record kind: {kind}"))?,
                title,
                event_date: date.and_then(|d| d.parse().ok()),
                event_time: time.and_then(|t| t.parse().ok()),
                priority: priority.as_deref().and_then(normalize::parse_priority),
                assignee,
                detail: serde_json::from_str(&detail)?,
                created_by,
            }))
        })
        .await?
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(
        &self,
        logical_type: LogicalType,
        fields: &HashMap<String, FieldValue>,
        actor_id: &str,
    ) -> Result<RecordId> {
        let record = NormalizedRecord::from_fields(fields, actor_id);
        let id = format!("{}_{}", logical_type.as_str(), Uuid::new_v4().simple());
        let db = Arc::clone(&self.db);
        let actor = actor_id.to_string();
        let record_id = id.clone();
        task::spawn_blocking(move || {
            let now = Utc::now().to_rfc3339();
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO records (
                    id, kind, title, event_date, event_time, priority,
                    assignee, detail, created_by, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                "#,
                params![
                    record_id,
                    logical_type.as_str(),
                    record.title,
                    record.event_date.map(|d| d.to_string()),
                    record.event_time.map(|t| t.to_string()),
                    record.priority.map(|p| p.as_str()),
                    record.assignee,
                    record.detail.to_string(),
                    actor,
                    now,
                ],
            )?;
            Ok::<_, anyhow::Error>(())
        })
        .await??;

        tracing::debug!(%id, kind = %logical_type, "created record");
        Ok(id)
    }

    async fn update(
        &self,
        record_id: &RecordId,
        logical_type: LogicalType,
        fields: &HashMap<String, FieldValue>,
        actor_id: &str,
    ) -> Result<()> {
        let record = NormalizedRecord::from_fields(fields, actor_id);
        let db = Arc::clone(&self.db);
        let id = record_id.clone();
        task::spawn_blocking(move || {
            let now = Utc::now().to_rfc3339();
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let changed = conn.execute(
                r#"
                UPDATE records
                SET kind = ?2, title = ?3, event_date = ?4, event_time = ?5,
                    priority = ?6, assignee = ?7, detail = ?8, updated_at = ?9
                WHERE id = ?1
                "#,
                params![
                    id,
                    logical_type.as_str(),
                    record.title,
                    record.event_date.map(|d| d.to_string()),
                    record.event_time.map(|t| t.to_string()),
                    record.priority.map(|p| p.as_str()),
                    record.assignee,
                    record.detail.to_string(),
                    now,
                ],
            )?;
            if changed == 0 {
                return Err(anyhow!("record not found: {id}"));
            }
            Ok(())
        })
        .await??;

        tracing::debug!(%record_id, kind = %logical_type, "updated record");
        Ok(())
    }
}

//! Relational persistence for structured records.
//!
//! One row per package, keyed by the unique business name. Known fields and
//! out-of-table fields are stored as two JSON columns so the schema never has
//! to change when the interpretation table grows.

use crate::schema::StructuredRecord;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record stored under `record.name`.
    async fn upsert(&self, record: &StructuredRecord, source: &str) -> Result<(), RecordStoreError>;

    async fn get(&self, name: &str) -> Result<Option<StructuredRecord>, RecordStoreError>;

    async fn list(&self) -> Result<Vec<StructuredRecord>, RecordStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("field serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database task failed: {0}")]
    Task(String),
}

/// SQLite-backed [`RecordStore`].
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    /// Open the database at `db_path`, creating the file and table if needed.
    pub fn new(db_path: &Path) -> Result<Self, RecordStoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RecordStoreError::Task(e.to_string()))?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), RecordStoreError> {
        let conn = connect(&self.db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS packages (
                name TEXT PRIMARY KEY,
                fields TEXT NOT NULL,
                extra TEXT NOT NULL,
                source TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, RecordStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, RecordStoreError> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = connect(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| RecordStoreError::Task(e.to_string()))?
    }
}

fn connect(path: &Path) -> Result<Connection, RecordStoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode(
    (name, fields, extra): (String, String, String),
) -> Result<StructuredRecord, RecordStoreError> {
    Ok(StructuredRecord {
        name,
        fields: serde_json::from_str::<BTreeMap<String, String>>(&fields)?,
        extra: serde_json::from_str::<BTreeMap<String, String>>(&extra)?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert(&self, record: &StructuredRecord, source: &str) -> Result<(), RecordStoreError> {
        let name = record.name.clone();
        let fields = serde_json::to_string(&record.fields)?;
        let extra = serde_json::to_string(&record.extra)?;
        let source = source.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO packages (name, fields, extra, source, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(name) DO UPDATE SET
                    fields = excluded.fields,
                    extra = excluded.extra,
                    source = excluded.source,
                    updated_at = excluded.updated_at
                "#,
                params![name, fields, extra, source, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, name: &str) -> Result<Option<StructuredRecord>, RecordStoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .prepare("SELECT name, fields, extra FROM packages WHERE name = ?1")?
                .query_row(params![name], row_to_record)
                .optional()?;
            row.map(decode).transpose()
        })
        .await
    }

    async fn list(&self) -> Result<Vec<StructuredRecord>, RecordStoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name, fields, extra FROM packages ORDER BY name")?;
            let rows = stmt
                .query_map([], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(decode).collect()
        })
        .await
    }
}

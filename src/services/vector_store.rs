//! Vector store port and a SQLite implementation using sqlite-vec.
//!
//! [`SqliteVectorStore`] keeps one row per chunk (`chunk_id` primary key,
//! `source` and `page` columns, embedding as a float32 blob) and ranks
//! queries with sqlite-vec's `vec_distance_cosine`. Replacing a source's
//! chunks runs in a single transaction, so a failed write leaves the
//! previous chunks in place.

use crate::output::{SourceReference, VectorChunk};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use tracing::debug;
use zerocopy::IntoBytes;

/// A chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: VectorChunk,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert chunks, replacing any with the same `chunk_id`.
    async fn upsert(&self, chunks: &[VectorChunk]) -> Result<(), VectorStoreError>;

    /// Top `top_k` chunks by similarity, best first. Empty when the store is
    /// empty or `top_k == 0`.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError>;

    /// Remove every chunk of one source. Returns how many were removed.
    async fn delete_source(&self, source_identifier: &str) -> Result<usize, VectorStoreError>;

    /// Swap a source's chunks for `chunks`. Returns how many were removed.
    async fn replace_source(
        &self,
        source_identifier: &str,
        chunks: &[VectorChunk],
    ) -> Result<usize, VectorStoreError> {
        let removed = self.delete_source(source_identifier).await?;
        self.upsert(chunks).await?;
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, VectorStoreError>;

    async fn count_source(&self, source_identifier: &str) -> Result<usize, VectorStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("embedding has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("index database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("index i/o failed: {0}")]
    Io(String),
    #[error("index task failed: {0}")]
    Task(String),
}

// ── sqlite-vec registration ──────────────────────────────────────────────

static VEC_EXTENSION: Once = Once::new();

/// Register sqlite-vec for every connection opened afterwards.
fn init_vector_extension() {
    VEC_EXTENSION.call_once(|| {
        use rusqlite::ffi::sqlite3_auto_extension;
        use sqlite_vec::sqlite3_vec_init;

        // SAFETY: sqlite3_vec_init has the signature sqlite3_auto_extension
        // expects; the crate only exposes it untyped.
        unsafe {
            #[allow(clippy::missing_transmute_annotations)]
            sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
        }
    });
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS chunks (
        chunk_id  TEXT PRIMARY KEY,
        source    TEXT NOT NULL,
        page      INTEGER NOT NULL,
        text      TEXT NOT NULL,
        embedding BLOB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS chunks_by_source ON chunks(source);
    CREATE TABLE IF NOT EXISTS index_meta (
        key   TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
"#;

/// SQLite-backed [`VectorStore`].
///
/// One connection per store, shared behind a mutex and only touched from
/// the blocking pool.
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVectorStore {
    /// Store that lives only as long as the process.
    pub fn in_memory() -> Result<Self, VectorStoreError> {
        init_vector_extension();
        Self::init(Connection::open_in_memory()?)
    }

    /// Open (or create) the index database at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VectorStoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VectorStoreError::Io(e.to_string()))?;
        }
        init_vector_extension();
        let store = Self::init(Connection::open(&path)?)?;
        debug!("opened vector index {}", path.display());
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, VectorStoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// sqlite-vec version linked into the index.
    pub async fn vec_version(&self) -> Result<String, VectorStoreError> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT vec_version()", [], |row| row.get(0))?))
            .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, VectorStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, VectorStoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| VectorStoreError::Task("index connection poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| VectorStoreError::Task(e.to_string()))?
    }
}

// ── Transaction helpers ──────────────────────────────────────────────────

fn stored_dimension(tx: &Transaction<'_>) -> Result<Option<usize>, VectorStoreError> {
    let dim: Option<i64> = tx
        .query_row(
            "SELECT value FROM index_meta WHERE key = 'dimension'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(dim.map(|d| d as usize))
}

fn delete_source_in(tx: &Transaction<'_>, source: &str) -> Result<usize, VectorStoreError> {
    let removed = tx.execute("DELETE FROM chunks WHERE source = ?1", params![source])?;
    let remaining: i64 = tx.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
    if remaining == 0 {
        tx.execute("DELETE FROM index_meta WHERE key = 'dimension'", [])?;
    }
    Ok(removed)
}

fn upsert_in(tx: &Transaction<'_>, chunks: &[VectorChunk]) -> Result<(), VectorStoreError> {
    let Some(first) = chunks.first() else {
        return Ok(());
    };
    let expected = stored_dimension(tx)?.unwrap_or(first.embedding.len());
    if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != expected) {
        return Err(VectorStoreError::DimensionMismatch {
            expected,
            actual: bad.embedding.len(),
        });
    }
    tx.execute(
        "INSERT INTO index_meta (key, value) VALUES ('dimension', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![expected as i64],
    )?;

    let mut stmt = tx.prepare(
        "INSERT INTO chunks (chunk_id, source, page, text, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(chunk_id) DO UPDATE SET
             source = excluded.source,
             page = excluded.page,
             text = excluded.text,
             embedding = excluded.embedding",
    )?;
    for chunk in chunks {
        stmt.execute(params![
            chunk.chunk_id,
            chunk.source_reference.source_identifier,
            chunk.source_reference.page_number,
            chunk.text,
            chunk.embedding.as_bytes(),
        ])?;
    }
    Ok(())
}

fn embedding_from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, chunks: &[VectorChunk]) -> Result<(), VectorStoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let chunks = chunks.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            upsert_in(&tx, &chunks)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query = embedding.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let Some(expected) = stored_dimension(&tx)? else {
                return Ok(Vec::new());
            };
            if expected != query.len() {
                return Err(VectorStoreError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }

            // Zero-norm vectors give a NULL distance; they rank last.
            let mut stmt = tx.prepare(
                "SELECT chunk_id, source, page, text, embedding,
                        vec_distance_cosine(embedding, ?1) AS distance
                 FROM chunks
                 ORDER BY distance IS NULL, distance, chunk_id
                 LIMIT ?2",
            )?;
            let hits = stmt
                .query_map(params![query.as_bytes(), top_k as i64], |row| {
                    let blob: Vec<u8> = row.get(4)?;
                    let distance: Option<f64> = row.get(5)?;
                    Ok(ScoredChunk {
                        chunk: VectorChunk {
                            chunk_id: row.get(0)?,
                            embedding: embedding_from_blob(&blob),
                            source_reference: SourceReference {
                                source_identifier: row.get(1)?,
                                page_number: row.get(2)?,
                            },
                            text: row.get(3)?,
                        },
                        score: distance.map_or(0.0, |d| (1.0 - d) as f32),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(hits)
        })
        .await
    }

    async fn delete_source(&self, source_identifier: &str) -> Result<usize, VectorStoreError> {
        let source = source_identifier.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let removed = delete_source_in(&tx, &source)?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn replace_source(
        &self,
        source_identifier: &str,
        chunks: &[VectorChunk],
    ) -> Result<usize, VectorStoreError> {
        let source = source_identifier.to_string();
        let chunks = chunks.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let removed = delete_source_in(&tx, &source)?;
            upsert_in(&tx, &chunks)?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    async fn count_source(&self, source_identifier: &str) -> Result<usize, VectorStoreError> {
        let source = source_identifier.to_string();
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }
}

//! SQLite vector store (sqlite-vec extension)
//!
//! Chunks and documents live in ordinary tables; embeddings live in a `vec0`
//! virtual table sized to the embedder's dimension at creation time. Per-file
//! replacement runs in a single transaction so readers see either the old or
//! the new chunk set, never a mix.

use super::{
    sort_results, Chunk, Document, FileStats, IndexStats, SearchOptions, SearchResult, VectorStore,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Register the sqlite-vec extension process-wide. Idempotent.
fn register_sqlite_vec() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe {
        #[allow(clippy::missing_transmute_annotations)]
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    dimensions: usize,
}

impl SqliteVectorStore {
    /// Open or create the database at `path` with a `vec0` table sized to
    /// `dimensions`. Reopening with a different dimension is an error.
    pub fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        register_sqlite_vec();
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open {}", path.as_ref().display()))?;
        Self::initialize(conn, dimensions)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        register_sqlite_vec();
        Self::initialize(Connection::open_in_memory()?, dimensions)
    }

    fn initialize(conn: Connection, dimensions: usize) -> Result<Self> {
        // journal_mode returns a row; in-memory databases reject WAL.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(())).ok();
        conn.execute_batch("PRAGMA synchronous = NORMAL;").ok();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                mod_time INTEGER NOT NULL,
                chunk_ids TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                content TEXT NOT NULL,
                hash TEXT NOT NULL,
                updated_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);
             CREATE TABLE IF NOT EXISTS chunk_vec_map (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_id TEXT NOT NULL UNIQUE
             );",
        )
        .context("failed to create schema")?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            Some(value) => {
                let found: usize = value.parse().unwrap_or(0);
                if found != dimensions {
                    return Err(anyhow!(
                        "vector table dimension mismatch: database has {}, store configured for {}",
                        found,
                        dimensions
                    ));
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO metadata (key, value) VALUES ('dimensions', ?1)",
                    params![dimensions.to_string()],
                )?;
            }
        }

        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_vec USING vec0(embedding float[{}] distance_metric=cosine)",
            dimensions
        ))
        .context("failed to create sqlite-vec table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite store lock poisoned"))
    }
}

fn vector_bytes(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let updated_at: String = row.get(6)?;
    Ok(Chunk {
        id: row.get(0)?,
        file_path: row.get(1)?,
        start_line: row.get::<_, i64>(2)? as u32,
        end_line: row.get::<_, i64>(3)? as u32,
        content: row.get(4)?,
        vector: Vec::new(),
        content_hash: row.get(5)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

const CHUNK_COLUMNS: &str = "chunk_id, path, start_line, end_line, content, hash, updated_at";

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn save_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        for chunk in &chunks {
            if chunk.vector.len() != self.dimensions {
                return Err(anyhow!(
                    "chunk {} has {} dimensions, store configured for {}",
                    chunk.id,
                    chunk.vector.len(),
                    self.dimensions
                ));
            }
            conn.execute(
                "INSERT OR REPLACE INTO chunks (chunk_id, path, start_line, end_line, content, hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    chunk.id,
                    chunk.file_path,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    chunk.content,
                    chunk.content_hash,
                    chunk.updated_at.to_rfc3339(),
                ],
            )?;

            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM chunk_vec_map WHERE chunk_id = ?1",
                    params![chunk.id],
                    |row| row.get(0),
                )
                .optional()?;
            let rowid = match existing {
                Some(id) => id,
                None => {
                    conn.execute(
                        "INSERT INTO chunk_vec_map (chunk_id) VALUES (?1)",
                        params![chunk.id],
                    )?;
                    conn.last_insert_rowid()
                }
            };

            // vec0 has no REPLACE; delete then insert.
            conn.execute("DELETE FROM chunk_vec WHERE rowid = ?1", params![rowid])?;
            conn.execute(
                "INSERT INTO chunk_vec (rowid, embedding) VALUES (?1, ?2)",
                params![rowid, vector_bytes(&chunk.vector)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        conn.execute(
            "DELETE FROM chunk_vec WHERE rowid IN (
                SELECT m.id FROM chunk_vec_map m
                JOIN chunks c ON c.chunk_id = m.chunk_id
                WHERE c.path = ?1
             )",
            params![file_path],
        )?;
        conn.execute(
            "DELETE FROM chunk_vec_map WHERE chunk_id IN (
                SELECT chunk_id FROM chunks WHERE path = ?1
             )",
            params![file_path],
        )?;
        conn.execute("DELETE FROM chunks WHERE path = ?1", params![file_path])?;
        tx.commit()?;
        Ok(())
    }

    async fn get_chunks_for_file(&self, file_path: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE path = ?1 ORDER BY start_line",
            CHUNK_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![file_path], row_to_chunk)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn get_all_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks ORDER BY path, start_line",
            CHUNK_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], row_to_chunk)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn get_document(&self, file_path: &str) -> Result<Option<Document>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT path, hash, mod_time, chunk_ids FROM documents WHERE path = ?1",
            params![file_path],
            |row| {
                let chunk_ids: String = row.get(3)?;
                Ok(Document {
                    path: row.get(0)?,
                    hash: row.get(1)?,
                    mod_time: row.get::<_, i64>(2)? as u64,
                    chunk_ids: serde_json::from_str(&chunk_ids).unwrap_or_default(),
                })
            },
        )
        .optional()
        .context("failed to query document")
    }

    async fn save_document(&self, doc: Document) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO documents (path, hash, mod_time, chunk_ids)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                doc.path,
                doc.hash,
                doc.mod_time as i64,
                serde_json::to_string(&doc.chunk_ids)?,
            ],
        )?;
        Ok(())
    }

    async fn delete_document(&self, file_path: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM documents WHERE path = ?1", params![file_path])?;
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT path, hash, mod_time, chunk_ids FROM documents ORDER BY path")?;
        let rows = stmt
            .query_map([], |row| {
                let chunk_ids: String = row.get(3)?;
                Ok(Document {
                    path: row.get(0)?,
                    hash: row.get(1)?,
                    mod_time: row.get::<_, i64>(2)? as u64,
                    chunk_ids: serde_json::from_str(&chunk_ids).unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        opts: SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        if query_vector.len() != self.dimensions {
            return Err(anyhow!(
                "query vector has {} dimensions, store configured for {}",
                query_vector.len(),
                self.dimensions
            ));
        }
        let conn = self.lock()?;
        let query_bytes = vector_bytes(query_vector);
        // Fetch more than asked so post-KNN tie-breaking stays deterministic.
        let k = (limit.max(1) * 4) as i64;

        let neighbors: Vec<(i64, f64)> = match &opts.path_prefix {
            Some(prefix) => {
                // The prefix filter applies before limiting: constrain the
                // KNN scan to rowids under the prefix.
                let mut stmt = conn.prepare(
                    "SELECT m.id FROM chunk_vec_map m
                     JOIN chunks c ON c.chunk_id = m.chunk_id
                     WHERE substr(c.path, 1, ?2) = ?1",
                )?;
                let ids = stmt
                    .query_map(params![prefix, prefix.len() as i64], |row| {
                        row.get::<_, i64>(0)
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let id_list = ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                let sql = format!(
                    "SELECT rowid, distance FROM chunk_vec
                     WHERE embedding MATCH ?1 AND rowid IN ({})
                     ORDER BY distance LIMIT {}",
                    id_list, k
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![query_bytes], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "SELECT rowid, distance FROM chunk_vec
                     WHERE embedding MATCH ?1
                     ORDER BY distance LIMIT {}",
                    k
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![query_bytes], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };

        let mut results = Vec::with_capacity(neighbors.len());
        for (rowid, distance) in neighbors {
            let chunk = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM chunks
                         WHERE chunk_id = (SELECT chunk_id FROM chunk_vec_map WHERE id = ?1)",
                        CHUNK_COLUMNS
                    ),
                    params![rowid],
                    row_to_chunk,
                )
                .optional()?;
            if let Some(chunk) = chunk {
                results.push(SearchResult {
                    chunk,
                    score: 1.0 - distance as f32, // cosine distance → similarity
                });
            }
        }

        sort_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn get_stats(&self) -> Result<IndexStats> {
        let conn = self.lock()?;
        let total_files: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        let total_chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |r| r.get(0))
            .unwrap_or(0);
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |r| r.get(0))
            .unwrap_or(0);
        let last_updated: Option<String> = conn
            .query_row("SELECT MAX(updated_at) FROM chunks", [], |r| r.get(0))
            .optional()?
            .flatten();
        Ok(IndexStats {
            total_files: total_files as usize,
            total_chunks: total_chunks as usize,
            index_size_bytes: (page_count * page_size) as u64,
            last_updated: last_updated.and_then(|t| {
                DateTime::parse_from_rfc3339(&t)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            }),
        })
    }

    async fn list_files_with_stats(&self) -> Result<Vec<FileStats>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT path, COUNT(*) FROM chunks GROUP BY path ORDER BY path",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FileStats {
                    path: row.get(0)?,
                    chunk_count: row.get::<_, i64>(1)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn load(&self) -> Result<()> {
        Ok(()) // schema initialized at open
    }

    async fn persist(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .ok();
        debug!("sqlite store checkpointed");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.persist().await
    }
}

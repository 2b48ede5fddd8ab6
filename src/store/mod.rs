//! Vector store contract and shared types
//!
//! Chunks and per-file documents are persisted behind the [`VectorStore`]
//! trait; three backends implement it (local snapshot file, SQLite with the
//! sqlite-vec extension, Qdrant), plus a workspace decorator that namespaces
//! paths so several projects can share one backend.
//!
//! Scoring is cosine similarity over normalized vectors. Ties break
//! deterministically by `(file_path asc, start_line asc)`. Search results
//! never carry vectors.

mod local;
mod qdrant;
mod sqlite;
mod workspace;

pub use local::LocalVectorStore;
pub use qdrant::QdrantVectorStore;
pub use sqlite::SqliteVectorStore;
pub use workspace::WorkspaceStore;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::path::Path;

/// A contiguous, line-aligned excerpt of a file with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub vector: Vec<f32>,
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-file metadata binding content hash, mod time, and chunk coverage.
/// An empty `chunk_ids` list means "not yet indexed", not "empty file".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub hash: String,
    pub mod_time: u64,
    pub chunk_ids: Vec<String>,
}

/// Options applied by the store before limiting.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Keep only chunks whose path starts with this prefix. An empty result
    /// set after filtering is a valid (empty) answer, never an error.
    pub path_prefix: Option<String>,
}

/// One search hit. The chunk's vector is always cleared.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub index_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FileStats {
    pub path: String,
    pub chunk_count: usize,
}

/// Persistence contract shared by every backend. The indexer is the single
/// writer per store instance; readers (the query layer) may run concurrently.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn save_chunks(&self, chunks: Vec<Chunk>) -> Result<()>;
    async fn delete_by_file(&self, file_path: &str) -> Result<()>;
    async fn get_chunks_for_file(&self, file_path: &str) -> Result<Vec<Chunk>>;
    async fn get_all_chunks(&self) -> Result<Vec<Chunk>>;

    async fn get_document(&self, file_path: &str) -> Result<Option<Document>>;
    async fn save_document(&self, doc: Document) -> Result<()>;
    async fn delete_document(&self, file_path: &str) -> Result<()>;
    async fn list_documents(&self) -> Result<Vec<Document>>;

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        opts: SearchOptions,
    ) -> Result<Vec<SearchResult>>;

    async fn get_stats(&self) -> Result<IndexStats>;
    async fn list_files_with_stats(&self) -> Result<Vec<FileStats>>;

    async fn load(&self) -> Result<()>;
    async fn persist(&self) -> Result<()>;

    /// Persist and release resources. Must be idempotent.
    async fn close(&self) -> Result<()>;
}

/// Deterministic chunk ID: identical content at identical coordinates
/// re-indexes to the identical ID.
pub fn chunk_id(file_path: &str, start_line: u32, end_line: u32, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b":");
    hasher.update(start_line.to_le_bytes());
    hasher.update(end_line.to_le_bytes());
    hasher.update(b":");
    hasher.update(content_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cosine similarity; zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Normalize to unit length; zero vectors pass through unchanged.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Canonical result ordering: higher score first, ties by
/// `(file_path asc, start_line asc)`.
pub fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
            .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
    });
}

/// Write a file atomically: temp file in the same directory, then rename.
/// Readers never observe a torn snapshot.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

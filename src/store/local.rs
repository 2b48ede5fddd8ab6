//! Local file-backed vector store
//!
//! Chunks and documents live in memory; `persist` writes a versioned bincode
//! snapshot to `.grepai/vectors.bin` atomically (temp file + rename), and
//! `load` is lazy on first use. The snapshot header records the embedding
//! dimension so a store is never reopened with mismatched vectors.

use super::{
    atomic_write, sort_results, Chunk, Document, FileStats, IndexStats, SearchOptions,
    SearchResult, VectorStore,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

const VECTOR_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct VectorSnapshot {
    schema_version: u32,
    dimensions: u32,
    chunks: Vec<Chunk>,
    documents: Vec<Document>,
}

#[derive(Default)]
struct State {
    chunks: HashMap<String, Chunk>,
    documents: HashMap<String, Document>,
    loaded: bool,
    last_updated: Option<DateTime<Utc>>,
}

pub struct LocalVectorStore {
    index_path: PathBuf,
    dimensions: usize,
    state: RwLock<State>,
}

impl LocalVectorStore {
    pub fn new(index_path: impl Into<PathBuf>, dimensions: usize) -> Self {
        Self {
            index_path: index_path.into(),
            dimensions,
            state: RwLock::new(State::default()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn ensure_loaded(&self) -> Result<()> {
        {
            let state = self.state.read().await;
            if state.loaded {
                return Ok(());
            }
        }
        self.load_snapshot().await
    }

    async fn load_snapshot(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.loaded {
            return Ok(());
        }

        if !self.index_path.exists() {
            state.loaded = true;
            return Ok(()); // no existing index, start fresh
        }

        let bytes = std::fs::read(&self.index_path)
            .with_context(|| format!("failed to read {}", self.index_path.display()))?;
        let snapshot: VectorSnapshot =
            bincode::deserialize(&bytes).context("failed to decode vector index")?;
        if snapshot.schema_version != VECTOR_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "vector index schema version {} unsupported (expected {})",
                snapshot.schema_version,
                VECTOR_SNAPSHOT_VERSION
            ));
        }
        if snapshot.dimensions as usize != self.dimensions {
            return Err(anyhow!(
                "vector index dimension mismatch: snapshot has {}, store configured for {}",
                snapshot.dimensions,
                self.dimensions
            ));
        }

        state.chunks = snapshot
            .chunks
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        state.documents = snapshot
            .documents
            .into_iter()
            .map(|d| (d.path.clone(), d))
            .collect();
        state.loaded = true;
        debug!(
            "loaded vector index: {} chunks, {} documents",
            state.chunks.len(),
            state.documents.len()
        );
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn save_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        self.ensure_loaded().await?;
        let mut state = self.state.write().await;
        for chunk in chunks {
            if chunk.vector.len() != self.dimensions {
                return Err(anyhow!(
                    "chunk {} has {} dimensions, store configured for {}",
                    chunk.id,
                    chunk.vector.len(),
                    self.dimensions
                ));
            }
            state.chunks.insert(chunk.id.clone(), chunk);
        }
        state.last_updated = Some(Utc::now());
        Ok(())
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<()> {
        self.ensure_loaded().await?;
        let mut state = self.state.write().await;
        state.chunks.retain(|_, c| c.file_path != file_path);
        state.last_updated = Some(Utc::now());
        Ok(())
    }

    async fn get_chunks_for_file(&self, file_path: &str) -> Result<Vec<Chunk>> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;
        let mut out: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|c| c.file_path == file_path)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.start_line);
        Ok(out)
    }

    async fn get_all_chunks(&self) -> Result<Vec<Chunk>> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;
        let mut out: Vec<Chunk> = state.chunks.values().cloned().collect();
        out.sort_by(|a, b| {
            (&a.file_path, a.start_line).cmp(&(&b.file_path, b.start_line))
        });
        Ok(out)
    }

    async fn get_document(&self, file_path: &str) -> Result<Option<Document>> {
        self.ensure_loaded().await?;
        Ok(self.state.read().await.documents.get(file_path).cloned())
    }

    async fn save_document(&self, doc: Document) -> Result<()> {
        self.ensure_loaded().await?;
        let mut state = self.state.write().await;
        state.documents.insert(doc.path.clone(), doc);
        state.last_updated = Some(Utc::now());
        Ok(())
    }

    async fn delete_document(&self, file_path: &str) -> Result<()> {
        self.ensure_loaded().await?;
        let mut state = self.state.write().await;
        state.documents.remove(file_path);
        state.last_updated = Some(Utc::now());
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;
        let mut out: Vec<Document> = state.documents.values().cloned().collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        opts: SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;

        let mut results: Vec<SearchResult> = state
            .chunks
            .values()
            .filter(|c| match &opts.path_prefix {
                Some(prefix) => c.file_path.starts_with(prefix.as_str()),
                None => true,
            })
            .map(|c| {
                let score = super::cosine_similarity(query_vector, &c.vector);
                let mut chunk = c.clone();
                chunk.vector = Vec::new();
                SearchResult { chunk, score }
            })
            .collect();

        sort_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn get_stats(&self) -> Result<IndexStats> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;
        let index_size_bytes = std::fs::metadata(&self.index_path)
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(IndexStats {
            total_files: state.documents.len(),
            total_chunks: state.chunks.len(),
            index_size_bytes,
            last_updated: state.last_updated,
        })
    }

    async fn list_files_with_stats(&self) -> Result<Vec<FileStats>> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for chunk in state.chunks.values() {
            *counts.entry(chunk.file_path.as_str()).or_default() += 1;
        }
        let mut out: Vec<FileStats> = counts
            .into_iter()
            .map(|(path, chunk_count)| FileStats {
                path: path.to_string(),
                chunk_count,
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn load(&self) -> Result<()> {
        self.load_snapshot().await
    }

    async fn persist(&self) -> Result<()> {
        let state = self.state.read().await;
        let mut chunks: Vec<Chunk> = state.chunks.values().cloned().collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        let mut documents: Vec<Document> = state.documents.values().cloned().collect();
        documents.sort_by(|a, b| a.path.cmp(&b.path));

        let snapshot = VectorSnapshot {
            schema_version: VECTOR_SNAPSHOT_VERSION,
            dimensions: self.dimensions as u32,
            chunks,
            documents,
        };
        let bytes = bincode::serialize(&snapshot).context("failed to encode vector index")?;
        atomic_write(&self.index_path, &bytes)?;
        debug!(
            "💾 persisted vector index to {} ({} bytes)",
            self.index_path.display(),
            bytes.len()
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.persist().await
    }
}

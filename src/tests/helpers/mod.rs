//! Shared test fixtures: a call-tracking vector store, a deterministic
//! embedder, and project tree builders.

use crate::embedder::{EmbedError, Embedder};
use crate::store::{
    sort_results, Chunk, Document, FileStats, IndexStats, SearchOptions, SearchResult, VectorStore,
};
use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

/// In-memory vector store that records which operations were called, so
/// tests can assert on the indexer's store access patterns.
#[derive(Default)]
pub struct MockVectorStore {
    pub chunks: Mutex<HashMap<String, Chunk>>,
    pub documents: Mutex<HashMap<String, Document>>,
    pub list_documents_called: AtomicBool,
    pub save_chunks_calls: AtomicUsize,
    pub delete_by_file_calls: AtomicUsize,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document, e.g. to arm the time gate.
    pub fn seed_document(&self, doc: Document) {
        self.documents.lock().unwrap().insert(doc.path.clone(), doc);
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn save_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        self.save_chunks_calls.fetch_add(1, Ordering::SeqCst);
        let mut map = self.chunks.lock().unwrap();
        for chunk in chunks {
            map.insert(chunk.id.clone(), chunk);
        }
        Ok(())
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<()> {
        self.delete_by_file_calls.fetch_add(1, Ordering::SeqCst);
        self.chunks
            .lock()
            .unwrap()
            .retain(|_, c| c.file_path != file_path);
        Ok(())
    }

    async fn get_chunks_for_file(&self, file_path: &str) -> Result<Vec<Chunk>> {
        let mut out: Vec<Chunk> = self
            .chunks
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.file_path == file_path)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.start_line);
        Ok(out)
    }

    async fn get_all_chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self.chunks.lock().unwrap().values().cloned().collect())
    }

    async fn get_document(&self, file_path: &str) -> Result<Option<Document>> {
        Ok(self.documents.lock().unwrap().get(file_path).cloned())
    }

    async fn save_document(&self, doc: Document) -> Result<()> {
        self.documents
            .lock()
            .unwrap()
            .insert(doc.path.clone(), doc);
        Ok(())
    }

    async fn delete_document(&self, file_path: &str) -> Result<()> {
        self.documents.lock().unwrap().remove(file_path);
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        self.list_documents_called.store(true, Ordering::SeqCst);
        Ok(self.documents.lock().unwrap().values().cloned().collect())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        opts: SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let mut results: Vec<SearchResult> = self
            .chunks
            .lock()
            .unwrap()
            .values()
            .filter(|c| match &opts.path_prefix {
                Some(prefix) => c.file_path.starts_with(prefix.as_str()),
                None => true,
            })
            .map(|c| {
                let score = crate::store::cosine_similarity(query_vector, &c.vector);
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
        Ok(IndexStats {
            total_files: self.documents.lock().unwrap().len(),
            total_chunks: self.chunks.lock().unwrap().len(),
            index_size_bytes: 0,
            last_updated: None,
        })
    }

    async fn list_files_with_stats(&self) -> Result<Vec<FileStats>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for chunk in self.chunks.lock().unwrap().values() {
            *counts.entry(chunk.file_path.clone()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(path, chunk_count)| FileStats { path, chunk_count })
            .collect())
    }

    async fn load(&self) -> Result<()> {
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Deterministic embedder: the vector is derived from the text hash, so
/// identical content always embeds identically. Tracks call counts and can
/// be scripted to fail.
pub struct MockEmbedder {
    dimensions: usize,
    pub batch_calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
    /// Fail this many leading `embed_batch` calls.
    pub fail_first: AtomicUsize,
    /// When failing, classify as transient (true) or fatal (false).
    pub fail_transient: AtomicBool,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            batch_calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
            fail_transient: AtomicBool::new(true),
        }
    }

    pub fn was_called(&self) -> bool {
        self.batch_calls.load(Ordering::SeqCst) > 0
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut v: Vec<f32> = digest
            .iter()
            .cycle()
            .take(self.dimensions)
            .map(|b| *b as f32 / 255.0)
            .collect();
        crate::store::normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let batch = [text.to_string()];
        let mut out = self.embed_batch(&batch).await?;
        Ok(out.pop().unwrap())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(if self.fail_transient.load(Ordering::SeqCst) {
                EmbedError::Transient {
                    message: "scripted transient failure".to_string(),
                    status: Some(503),
                }
            } else {
                EmbedError::Fatal {
                    message: "scripted fatal failure".to_string(),
                    status: Some(400),
                }
            });
        }

        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Write `count` identical Go fixture files into `root`.
pub fn create_go_fixture_files(root: &Path, count: usize) {
    let content = format!("package main\n\n{}", "func f() int { return 1 }\n".repeat(80));
    for i in 0..count {
        std::fs::write(root.join(format!("file_{:04}.go", i)), &content).unwrap();
    }
}

//! Workspace prefix decorator
//!
//! Lets several projects share one backend: every persisted path is
//! namespaced `workspace/project/relative/path` on the way in and stripped
//! on the way out. The inner store never knows. Searches are scoped to the
//! wrapper's subtree, so project A's writes are invisible to project B.

use super::{
    Chunk, Document, FileStats, IndexStats, SearchOptions, SearchResult, VectorStore,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub struct WorkspaceStore {
    inner: Arc<dyn VectorStore>,
    prefix: String,
}

impl WorkspaceStore {
    pub fn new(inner: Arc<dyn VectorStore>, workspace: &str, project: &str) -> Self {
        Self {
            inner,
            prefix: format!("{}/{}/", workspace, project),
        }
    }

    /// The `workspace/project/` prefix this wrapper applies.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn add_prefix(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }

    fn strip_prefix<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.prefix.as_str()).unwrap_or(path)
    }

    fn strip_chunk(&self, mut chunk: Chunk) -> Chunk {
        chunk.file_path = self.strip_prefix(&chunk.file_path).to_string();
        chunk
    }
}

#[async_trait]
impl VectorStore for WorkspaceStore {
    async fn save_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        let prefixed = chunks
            .into_iter()
            .map(|mut c| {
                c.file_path = self.add_prefix(&c.file_path);
                c
            })
            .collect();
        self.inner.save_chunks(prefixed).await
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<()> {
        self.inner.delete_by_file(&self.add_prefix(file_path)).await
    }

    async fn get_chunks_for_file(&self, file_path: &str) -> Result<Vec<Chunk>> {
        let chunks = self
            .inner
            .get_chunks_for_file(&self.add_prefix(file_path))
            .await?;
        Ok(chunks.into_iter().map(|c| self.strip_chunk(c)).collect())
    }

    async fn get_all_chunks(&self) -> Result<Vec<Chunk>> {
        let chunks = self.inner.get_all_chunks().await?;
        Ok(chunks
            .into_iter()
            .filter(|c| c.file_path.starts_with(self.prefix.as_str()))
            .map(|c| self.strip_chunk(c))
            .collect())
    }

    async fn get_document(&self, file_path: &str) -> Result<Option<Document>> {
        let doc = self.inner.get_document(&self.add_prefix(file_path)).await?;
        Ok(doc.map(|mut d| {
            d.path = self.strip_prefix(&d.path).to_string();
            d
        }))
    }

    async fn save_document(&self, mut doc: Document) -> Result<()> {
        doc.path = self.add_prefix(&doc.path);
        self.inner.save_document(doc).await
    }

    async fn delete_document(&self, file_path: &str) -> Result<()> {
        self.inner.delete_document(&self.add_prefix(file_path)).await
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let docs = self.inner.list_documents().await?;
        Ok(docs
            .into_iter()
            .filter(|d| d.path.starts_with(self.prefix.as_str()))
            .map(|mut d| {
                d.path = self.strip_prefix(&d.path).to_string();
                d
            })
            .collect())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        opts: SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        // Scope the search to this wrapper's subtree; a caller-supplied
        // prefix nests inside it.
        let scoped = SearchOptions {
            path_prefix: Some(match &opts.path_prefix {
                Some(user_prefix) => format!("{}{}", self.prefix, user_prefix),
                None => self.prefix.clone(),
            }),
        };
        let results = self.inner.search(query_vector, limit, scoped).await?;
        Ok(results
            .into_iter()
            .map(|mut r| {
                r.chunk = self.strip_chunk(r.chunk);
                r
            })
            .collect())
    }

    async fn get_stats(&self) -> Result<IndexStats> {
        // The inner stats span every project; recompute within the subtree.
        let files = self.list_files_with_stats().await?;
        let docs = self.list_documents().await?;
        let total_chunks = files.iter().map(|f| f.chunk_count).sum();
        Ok(IndexStats {
            total_files: docs.len(),
            total_chunks,
            index_size_bytes: 0,
            last_updated: None,
        })
    }

    async fn list_files_with_stats(&self) -> Result<Vec<FileStats>> {
        let files = self.inner.list_files_with_stats().await?;
        Ok(files
            .into_iter()
            .filter(|f| f.path.starts_with(self.prefix.as_str()))
            .map(|mut f| {
                f.path = self.strip_prefix(&f.path).to_string();
                f
            })
            .collect())
    }

    async fn load(&self) -> Result<()> {
        self.inner.load().await
    }

    async fn persist(&self) -> Result<()> {
        self.inner.persist().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

//! Qdrant vector store
//!
//! One collection per project, named by sanitizing the project root path.
//! Chunk points carry the chunk payload (`path`, `start_line`, `end_line`,
//! `content`, `hash`, `updated_at`); per-file document metadata rides along
//! as zero-vector points tagged `kind = "doc"` so the whole index lives in
//! the backend. Per-file replacement uses delete-by-filter + upsert.

use super::{
    sort_results, Chunk, Document, FileStats, IndexStats, SearchOptions, SearchResult, VectorStore,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Candidates fetched per search; the path-prefix filter is applied on the
/// full candidate set before limiting.
const SEARCH_OVERSAMPLE: u64 = 256;

pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    dimensions: usize,
}

impl QdrantVectorStore {
    pub fn connect(url: &str, api_key: Option<&str>, project_root: &str, dimensions: usize) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| anyhow!("failed to build qdrant client: {}", e))?;
        Ok(Self {
            client,
            collection: collection_name(project_root),
            dimensions,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn ensure_collection(&self) -> Result<()> {
        if self
            .client
            .collection_info(&self.collection)
            .await
            .is_ok()
        {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.dimensions as u64, Distance::Cosine),
                ),
            )
            .await
            .with_context(|| format!("failed to create collection {}", self.collection))?;
        debug!("created qdrant collection {}", self.collection);
        Ok(())
    }

    fn chunk_point(&self, chunk: &Chunk) -> Result<PointStruct> {
        let payload: Payload = serde_json::json!({
            "kind": "chunk",
            "chunk_id": chunk.id,
            "path": chunk.file_path,
            "start_line": chunk.start_line,
            "end_line": chunk.end_line,
            "content": chunk.content,
            "hash": chunk.content_hash,
            "updated_at": chunk.updated_at.to_rfc3339(),
        })
        .try_into()
        .map_err(|e| anyhow!("failed to build chunk payload: {}", e))?;
        Ok(PointStruct::new(
            point_id(&chunk.id),
            chunk.vector.clone(),
            payload,
        ))
    }

    fn doc_point(&self, doc: &Document) -> Result<PointStruct> {
        let payload: Payload = serde_json::json!({
            "kind": "doc",
            "path": doc.path,
            "hash": doc.hash,
            "mod_time": doc.mod_time,
            "chunk_ids": doc.chunk_ids,
        })
        .try_into()
        .map_err(|e| anyhow!("failed to build document payload: {}", e))?;
        Ok(PointStruct::new(
            point_id(&format!("doc:{}", doc.path)),
            vec![0.0f32; self.dimensions],
            payload,
        ))
    }

    /// Scroll every point matching `filter`, following pagination.
    async fn scroll_all(&self, filter: Filter) -> Result<Vec<serde_json::Value>> {
        let mut out = Vec::new();
        let mut offset = None;
        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection)
                .filter(filter.clone())
                .limit(512)
                .with_payload(true);
            if let Some(next) = offset.take() {
                builder = builder.offset(next);
            }
            let response = self
                .client
                .scroll(builder)
                .await
                .context("qdrant scroll failed")?;
            for point in response.result {
                out.push(payload_to_json(point.payload));
            }
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(out)
    }
}

fn payload_to_json(
    payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> serde_json::Value {
    let map = payload
        .into_iter()
        .map(|(k, v)| (k, v.into_json()))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

fn json_chunk(value: &serde_json::Value) -> Option<Chunk> {
    Some(Chunk {
        id: value.get("chunk_id")?.as_str()?.to_string(),
        file_path: value.get("path")?.as_str()?.to_string(),
        start_line: value.get("start_line")?.as_u64()? as u32,
        end_line: value.get("end_line")?.as_u64()? as u32,
        content: value.get("content")?.as_str()?.to_string(),
        vector: Vec::new(),
        content_hash: value.get("hash")?.as_str()?.to_string(),
        updated_at: value
            .get("updated_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

fn json_document(value: &serde_json::Value) -> Option<Document> {
    Some(Document {
        path: value.get("path")?.as_str()?.to_string(),
        hash: value.get("hash")?.as_str()?.to_string(),
        mod_time: value.get("mod_time")?.as_u64().unwrap_or(0),
        chunk_ids: value
            .get("chunk_ids")?
            .as_array()?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    })
}

/// Deterministic UUID point ID derived from a logical key.
fn point_id(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Sanitize a project root path into a collection name.
pub fn collection_name(project_root: &str) -> String {
    let sanitized: String = project_root
        .trim_matches(|c| c == '/' || c == '\\')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "grepai-index".to_string()
    } else {
        format!("grepai-{}", trimmed)
    }
}

fn chunk_filter() -> Filter {
    Filter::must([Condition::matches("kind", "chunk".to_string())])
}

fn doc_filter() -> Filter {
    Filter::must([Condition::matches("kind", "doc".to_string())])
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn save_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let points = chunks
            .iter()
            .map(|c| self.chunk_point(c))
            .collect::<Result<Vec<_>>>()?;
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .context("qdrant upsert failed")?;
        Ok(())
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<()> {
        let filter = Filter::must([
            Condition::matches("kind", "chunk".to_string()),
            Condition::matches("path", file_path.to_string()),
        ]);
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(filter)
                    .wait(true),
            )
            .await
            .context("qdrant delete-by-filter failed")?;
        Ok(())
    }

    async fn get_chunks_for_file(&self, file_path: &str) -> Result<Vec<Chunk>> {
        let filter = Filter::must([
            Condition::matches("kind", "chunk".to_string()),
            Condition::matches("path", file_path.to_string()),
        ]);
        let mut chunks: Vec<Chunk> = self
            .scroll_all(filter)
            .await?
            .iter()
            .filter_map(json_chunk)
            .collect();
        chunks.sort_by_key(|c| c.start_line);
        Ok(chunks)
    }

    async fn get_all_chunks(&self) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .scroll_all(chunk_filter())
            .await?
            .iter()
            .filter_map(json_chunk)
            .collect();
        chunks.sort_by(|a, b| (&a.file_path, a.start_line).cmp(&(&b.file_path, b.start_line)));
        Ok(chunks)
    }

    async fn get_document(&self, file_path: &str) -> Result<Option<Document>> {
        let filter = Filter::must([
            Condition::matches("kind", "doc".to_string()),
            Condition::matches("path", file_path.to_string()),
        ]);
        Ok(self
            .scroll_all(filter)
            .await?
            .iter()
            .filter_map(json_document)
            .next())
    }

    async fn save_document(&self, doc: Document) -> Result<()> {
        let point = self.doc_point(&doc)?;
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .context("qdrant document upsert failed")?;
        Ok(())
    }

    async fn delete_document(&self, file_path: &str) -> Result<()> {
        let filter = Filter::must([
            Condition::matches("kind", "doc".to_string()),
            Condition::matches("path", file_path.to_string()),
        ]);
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(filter)
                    .wait(true),
            )
            .await
            .context("qdrant document delete failed")?;
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .scroll_all(doc_filter())
            .await?
            .iter()
            .filter_map(json_document)
            .collect();
        docs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(docs)
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
        // Qdrant's keyword match is exact, so prefix scoping happens on an
        // oversampled candidate set before the limit is applied.
        let top_k = (limit as u64).saturating_mul(4).max(SEARCH_OVERSAMPLE);
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, query_vector.to_vec(), top_k)
                    .filter(chunk_filter())
                    .with_payload(true),
            )
            .await
            .context("qdrant search failed")?;

        let mut results = Vec::new();
        for point in response.result {
            let value = payload_to_json(point.payload);
            let Some(chunk) = json_chunk(&value) else {
                continue;
            };
            if let Some(prefix) = &opts.path_prefix {
                if !chunk.file_path.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            results.push(SearchResult {
                chunk,
                score: point.score,
            });
        }

        sort_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn get_stats(&self) -> Result<IndexStats> {
        let chunks = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(chunk_filter())
                    .exact(true),
            )
            .await
            .context("qdrant count failed")?;
        let docs = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(doc_filter())
                    .exact(true),
            )
            .await
            .context("qdrant count failed")?;
        Ok(IndexStats {
            total_files: docs.result.map(|r| r.count).unwrap_or(0) as usize,
            total_chunks: chunks.result.map(|r| r.count).unwrap_or(0) as usize,
            index_size_bytes: 0, // remote; size not reported
            last_updated: None,
        })
    }

    async fn list_files_with_stats(&self) -> Result<Vec<FileStats>> {
        let chunks = self.get_all_chunks().await?;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for chunk in chunks {
            *counts.entry(chunk.file_path).or_default() += 1;
        }
        let mut out: Vec<FileStats> = counts
            .into_iter()
            .map(|(path, chunk_count)| FileStats { path, chunk_count })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn load(&self) -> Result<()> {
        self.ensure_collection().await
    }

    async fn persist(&self) -> Result<()> {
        Ok(()) // writes are upserted with wait=true; nothing buffered locally
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

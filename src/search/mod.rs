//! Semantic search
//!
//! Embeds the query once, oversamples candidates from the vector store,
//! then optionally applies additive source/test path boosts and a lexical
//! hybrid rescore. With no boosts and `alpha = 0` the output is exactly the
//! store's raw top results. Call-graph queries live in [`crate::trace`].

use crate::embedder::Embedder;
use crate::store::{sort_results, SearchOptions, SearchResult, VectorStore};
use anyhow::{anyhow, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Candidates fetched per result slot before rescoring.
const OVERSAMPLE: usize = 3;

/// Additive score boosts keyed by path patterns.
#[derive(Debug, Clone)]
pub struct BoostConfig {
    /// Paths that look like production source.
    pub source_patterns: Vec<String>,
    /// Paths that look like tests.
    pub test_patterns: Vec<String>,
    pub source_boost: f32,
    pub test_boost: f32,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            source_patterns: vec!["src/**".to_string(), "lib/**".to_string()],
            test_patterns: vec![
                "test/**".to_string(),
                "tests/**".to_string(),
                "**/*_test.*".to_string(),
                "**/*.test.*".to_string(),
            ],
            source_boost: 0.05,
            test_boost: -0.05,
        }
    }
}

struct CompiledBoosts {
    source: GlobSet,
    test: GlobSet,
    source_boost: f32,
    test_boost: f32,
}

pub struct SearchEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    boosts: Option<CompiledBoosts>,
    /// Lexical weight α ∈ [0, 1]; 0 disables hybrid rescoring.
    alpha: f32,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            boosts: None,
            alpha: 0.0,
        }
    }

    pub fn with_boosts(mut self, config: BoostConfig) -> Result<Self> {
        self.boosts = Some(CompiledBoosts {
            source: compile_globs(&config.source_patterns)?,
            test: compile_globs(&config.test_patterns)?,
            source_boost: config.source_boost,
            test_boost: config.test_boost,
        });
        Ok(self)
    }

    pub fn with_hybrid_alpha(mut self, alpha: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(anyhow!("hybrid alpha must be in [0, 1], got {}", alpha));
        }
        self.alpha = alpha;
        Ok(self)
    }

    /// Semantic search with optional path-prefix scoping.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        path_prefix: Option<String>,
    ) -> Result<Vec<SearchResult>> {
        let mut query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| anyhow!("failed to embed query: {}", e))?;
        crate::store::normalize(&mut query_vector);

        let fetch = limit.saturating_mul(OVERSAMPLE).max(limit);
        let mut results = self
            .store
            .search(&query_vector, fetch, SearchOptions { path_prefix })
            .await?;
        debug!("search fetched {} candidates for {:?}", results.len(), query);

        // With no boosts and α = 0 the raw store order is the answer.
        if self.boosts.is_none() && self.alpha == 0.0 {
            results.truncate(limit);
            return Ok(results);
        }

        let query_tokens = tokenize(query);
        for result in &mut results {
            if let Some(boosts) = &self.boosts {
                let path = result.chunk.file_path.as_str();
                if boosts.test.is_match(path) {
                    result.score += boosts.test_boost;
                } else if boosts.source.is_match(path) {
                    result.score += boosts.source_boost;
                }
            }
            if self.alpha > 0.0 {
                let lexical = lexical_score(&query_tokens, &result.chunk.content);
                result.score = (1.0 - self.alpha) * result.score + self.alpha * lexical;
            }
        }

        sort_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }
}

/// Fraction of query tokens present in the chunk, discounted by chunk size
/// so short, dense matches rank above sprawling ones.
fn lexical_score(query_tokens: &HashSet<String>, content: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let chunk_tokens = tokenize(content);
    if chunk_tokens.is_empty() {
        return 0.0;
    }
    let matched = query_tokens
        .iter()
        .filter(|t| chunk_tokens.contains(*t))
        .count();
    let overlap = matched as f32 / query_tokens.len() as f32;
    let length_discount = 1.0 / (1.0 + (chunk_tokens.len() as f32 / 512.0));
    overlap * length_discount
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn compile_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| anyhow!("invalid boost pattern {:?}: {}", pattern, e))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbedError;
    use crate::store::{chunk_id, Chunk, LocalVectorStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    /// Embedder that maps known phrases to fixed unit vectors.
    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(if text.contains("auth") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            })
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn chunk(path: &str, content: &str, vector: Vec<f32>) -> Chunk {
        Chunk {
            id: chunk_id(path, 1, 10, "h"),
            file_path: path.to_string(),
            start_line: 1,
            end_line: 10,
            content: content.to_string(),
            vector,
            content_hash: "h".to_string(),
            updated_at: Utc::now(),
        }
    }

    async fn seeded_store(dir: &TempDir) -> Arc<dyn VectorStore> {
        let store = LocalVectorStore::new(dir.path().join("vectors.bin"), 2);
        store
            .save_chunks(vec![
                chunk("src/auth.go", "func Login() {}", vec![0.9, 0.1]),
                chunk("src/user.go", "func User() {}", vec![0.8, 0.2]),
                chunk("tests/auth_test.go", "func TestLogin() {}", vec![0.95, 0.05]),
            ])
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_plain_search_matches_raw_store_order() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let engine = SearchEngine::new(store.clone(), Arc::new(StubEmbedder));

        let results = engine.search("auth handler", 2, None).await.unwrap();

        let mut query = vec![1.0, 0.0];
        crate::store::normalize(&mut query);
        let raw = store
            .search(&query, 2, SearchOptions::default())
            .await
            .unwrap();

        let got: Vec<_> = results.iter().map(|r| r.chunk.id.clone()).collect();
        let want: Vec<_> = raw.iter().map(|r| r.chunk.id.clone()).collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn test_test_boost_demotes_test_files() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let engine = SearchEngine::new(store, Arc::new(StubEmbedder))
            .with_boosts(BoostConfig {
                source_boost: 0.1,
                test_boost: -0.2,
                ..BoostConfig::default()
            })
            .unwrap();

        let results = engine.search("auth handler", 3, None).await.unwrap();
        // The test file has the best raw cosine but the boost flips it.
        assert_eq!(results[0].chunk.file_path, "src/auth.go");
        assert_eq!(results.last().unwrap().chunk.file_path, "tests/auth_test.go");
    }

    #[tokio::test]
    async fn test_hybrid_rescoring_prefers_lexical_overlap() {
        let dir = TempDir::new().unwrap();
        let store = LocalVectorStore::new(dir.path().join("vectors.bin"), 2);
        // Identical vectors: only the lexical signal can separate them.
        store
            .save_chunks(vec![
                chunk("src/a.go", "func Login() {}", vec![1.0, 0.0]),
                chunk("src/b.go", "func Logout() {}", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let engine = SearchEngine::new(Arc::new(store), Arc::new(StubEmbedder))
            .with_hybrid_alpha(0.5)
            .unwrap();
        let results = engine.search("auth login", 2, None).await.unwrap();
        assert_eq!(results[0].chunk.file_path, "src/a.go");
    }

    #[tokio::test]
    async fn test_path_prefix_scopes_results() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let engine = SearchEngine::new(store, Arc::new(StubEmbedder));

        let results = engine
            .search("auth handler", 10, Some("src/".to_string()))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.chunk.file_path.starts_with("src/")));
    }

    #[test]
    fn test_alpha_validation() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn VectorStore> =
            Arc::new(LocalVectorStore::new(dir.path().join("v.bin"), 2));
        assert!(SearchEngine::new(store, Arc::new(StubEmbedder))
            .with_hybrid_alpha(1.5)
            .is_err());
    }
}

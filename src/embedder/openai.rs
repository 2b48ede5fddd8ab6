//! OpenAI-compatible embedding provider
//!
//! Native batch via `POST {endpoint}/v1/embeddings` with bearer auth.
//! Rate-limit responses (429) surface as transient errors carrying the
//! status code so the indexer can report the retry in progress callbacks.

use super::{EmbedError, Embedder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(
        endpoint: &str,
        model: &str,
        dimensions: usize,
        api_key: Option<&str>,
    ) -> Result<Self, EmbedError> {
        let base = super::normalize_endpoint(endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(EmbedError::from_reqwest)?;
        Ok(Self {
            client,
            url: format!("{}/v1/embeddings", base),
            model: model.to_string(),
            dimensions,
            api_key: api_key.map(str::to_string),
        })
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        debug!("POST {} ({} inputs)", self.url, input.len());
        let mut request = self.client.post(&self.url).json(&EmbeddingsRequest {
            model: &self.model,
            input,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(EmbedError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::from_status(status, &body));
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| EmbedError::Fatal {
            message: format!("failed to decode embeddings response: {}", e),
            status: None,
        })?;

        if parsed.data.len() != input.len() {
            return Err(EmbedError::Fatal {
                message: format!(
                    "embeddings response has {} items for {} inputs",
                    parsed.data.len(),
                    input.len()
                ),
                status: None,
            });
        }

        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if item.embedding.len() != self.dimensions {
                return Err(EmbedError::DimensionMismatch {
                    got: item.embedding.len(),
                    want: self.dimensions,
                });
            }
            out.push(item.embedding);
        }
        Ok(out)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| EmbedError::Fatal {
            message: "empty embeddings response".to_string(),
            status: None,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

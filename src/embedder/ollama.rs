//! Ollama embedding provider
//!
//! Minimal non-streaming client for `POST {endpoint}/api/embeddings`. The
//! server has no batch endpoint, so `embed_batch` issues sequential single
//! calls.

use super::{EmbedError, Embedder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(endpoint: &str, model: &str, dimensions: usize) -> Result<Self, EmbedError> {
        let base = super::normalize_endpoint(endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(EmbedError::from_reqwest)?;
        Ok(Self {
            client,
            url: format!("{}/api/embeddings", base),
            model: model.to_string(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        debug!("POST {} ({} chars)", self.url, text.len());
        let response = self
            .client
            .post(&self.url)
            .json(&EmbeddingsRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(EmbedError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::from_status(status, &body));
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| EmbedError::Fatal {
            message: format!("failed to decode embeddings response: {}", e),
            status: None,
        })?;

        if parsed.embedding.len() != self.dimensions {
            return Err(EmbedError::DimensionMismatch {
                got: parsed.embedding.len(),
                want: self.dimensions,
            });
        }
        Ok(parsed.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        // No server-side batch; emulate with sequential singles.
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

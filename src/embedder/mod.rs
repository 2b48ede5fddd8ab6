//! Embedding providers
//!
//! Text → vector conversion behind the [`Embedder`] trait, with three HTTP
//! implementations: Ollama (no server-side batch; sequential singles),
//! LM Studio (OpenAI-shaped batch endpoint), and any OpenAI-compatible
//! remote (native batch, bearer auth, rate-limit aware).
//!
//! Errors classify as transient (connect/timeout/5xx/429, retried by the
//! indexer with backoff) or fatal (other 4xx, dimension mismatch; the batch
//! is deferred to the next pass).

mod lmstudio;
mod ollama;
mod openai;

pub use lmstudio::LmStudioEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

use crate::config::{EmbedderConfig, EmbedderProvider};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    /// Network-level or server-side trouble that a retry may fix.
    #[error("transient embedding failure: {message}")]
    Transient {
        message: String,
        status: Option<u16>,
    },

    /// The request itself is bad; retrying the same batch cannot help.
    #[error("embedding request failed: {message}")]
    Fatal {
        message: String,
        status: Option<u16>,
    },

    #[error("embedding dimension mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            EmbedError::Transient { status, .. } | EmbedError::Fatal { status, .. } => *status,
            EmbedError::DimensionMismatch { .. } => None,
        }
    }

    /// Connection and timeout failures are transient; everything else from
    /// the client side is fatal.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            EmbedError::Transient {
                message: err.to_string(),
                status: None,
            }
        } else {
            EmbedError::Fatal {
                message: err.to_string(),
                status: None,
            }
        }
    }

    /// Classify a non-2xx response: 429 and 5xx are transient, other 4xx
    /// fatal.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let code = status.as_u16();
        let message = format!("HTTP {}: {}", code, snippet(body));
        if code == 429 || status.is_server_error() {
            EmbedError::Transient {
                message,
                status: Some(code),
            }
        } else {
            EmbedError::Fatal {
                message,
                status: Some(code),
            }
        }
    }
}

/// Trim a response body for error messages.
fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let mut end = MAX;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}

/// Text → vector conversion. Implementations must be reentrant: one embedder
/// may serve several sessions in a workspace concurrently.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
    fn dimensions(&self) -> usize;

    /// Release resources. Default is a no-op; must be idempotent.
    async fn close(&self) {}
}

/// Build the embedder named by the config.
pub fn build_embedder(cfg: &EmbedderConfig) -> Result<Arc<dyn Embedder>, EmbedError> {
    let embedder: Arc<dyn Embedder> = match cfg.provider {
        EmbedderProvider::Ollama => Arc::new(OllamaEmbedder::new(
            &cfg.endpoint,
            &cfg.model,
            cfg.dimensions,
        )?),
        EmbedderProvider::LmStudio => Arc::new(LmStudioEmbedder::new(
            &cfg.endpoint,
            &cfg.model,
            cfg.dimensions,
        )?),
        EmbedderProvider::OpenAi => Arc::new(OpenAiEmbedder::new(
            &cfg.endpoint,
            &cfg.model,
            cfg.dimensions,
            cfg.api_key.as_deref(),
        )?),
    };
    Ok(embedder)
}

/// Validate an HTTP endpoint and normalize away the trailing slash.
pub(crate) fn normalize_endpoint(endpoint: &str) -> Result<String, EmbedError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() || !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(EmbedError::Fatal {
            message: format!("invalid embedder endpoint {:?}", endpoint),
            status: None,
        });
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

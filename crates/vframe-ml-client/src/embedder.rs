//! Text embeddings.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MlClientConfig;
use crate::error::{MlError, MlResult};

/// Produces a fixed-size vector for a piece of text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> MlResult<Vec<f32>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// [`Embedder`] backed by Ollama's `/api/embeddings`.
pub struct OllamaEmbedder {
    http: Client,
    url: String,
    model: String,
    dimension: Option<usize>,
}

impl OllamaEmbedder {
    pub fn new(config: &MlClientConfig) -> MlResult<Self> {
        Ok(Self {
            http: config.http_client()?,
            url: format!("{}/api/embeddings", config.ollama_url.trim_end_matches('/')),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dim,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> MlResult<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self.http.post(&self.url).json(&request).send().await?;
        let body: EmbeddingResponse = MlError::check("embedding service", response)
            .await?
            .json()
            .await?;

        let embedding = body.embedding;
        if embedding.is_empty() {
            return Err(MlError::invalid_response("embedding service returned an empty vector"));
        }
        if let Some(expected) = self.dimension {
            if embedding.len() != expected {
                return Err(MlError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        debug!("Embedded {} chars into {} dimensions", text.len(), embedding.len());
        Ok(embedding)
    }
}

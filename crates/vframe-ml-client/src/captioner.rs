//! Frame captioning through a vision model.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MlClientConfig;
use crate::error::{MlError, MlResult};

/// Produces a text description of an image.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn describe(&self, image: &[u8]) -> MlResult<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
}

/// One line of the streamed generate response.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

/// [`Captioner`] backed by Ollama's `/api/generate`.
pub struct OllamaCaptioner {
    http: Client,
    url: String,
    model: String,
    prompt: String,
}

impl OllamaCaptioner {
    pub fn new(config: &MlClientConfig) -> MlResult<Self> {
        Ok(Self {
            http: config.http_client()?,
            url: format!("{}/api/generate", config.ollama_url.trim_end_matches('/')),
            model: config.caption_model.clone(),
            prompt: config.caption_prompt.clone(),
        })
    }
}

#[async_trait]
impl Captioner for OllamaCaptioner {
    async fn describe(&self, image: &[u8]) -> MlResult<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: vec![BASE64.encode(image)],
        };

        debug!("Requesting caption from {} ({} bytes)", self.url, image.len());
        let response = self.http.post(&self.url).json(&request).send().await?;
        let body = MlError::check("caption service", response).await?.text().await?;

        let description = collect_ndjson(&body)?;
        if description.is_empty() {
            return Err(MlError::invalid_response("caption service returned empty text"));
        }
        Ok(description)
    }
}

/// Concatenate the `response` fields of a newline-delimited JSON body.
fn collect_ndjson(body: &str) -> MlResult<String> {
    let mut text = String::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let chunk: GenerateChunk = serde_json::from_str(line)?;
        if let Some(error) = chunk.error {
            return Err(MlError::RequestFailed(error));
        }
        text.push_str(&chunk.response);
    }
    Ok(text.trim().to_string())
}

//! ML client configuration.

use std::time::Duration;

/// Configuration for the captioning, embedding and vector-store clients.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Base URL of the Ollama server
    pub ollama_url: String,
    /// Vision model used for frame descriptions
    pub caption_model: String,
    /// Prompt sent with every frame
    pub caption_prompt: String,
    /// Text embedding model
    pub embedding_model: String,
    /// Expected embedding size, checked when set
    pub embedding_dim: Option<usize>,
    /// Base URL of the Chroma server
    pub chroma_url: String,
    /// Collection holding frame vectors
    pub chroma_collection: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            caption_model: "llava".to_string(),
            caption_prompt: "Describe this image in detail.".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dim: None,
            chroma_url: "http://localhost:8000".to_string(),
            chroma_collection: "video_frames".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl MlClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ollama_url: std::env::var("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            caption_model: std::env::var("CAPTION_MODEL").unwrap_or(defaults.caption_model),
            caption_prompt: std::env::var("CAPTION_PROMPT").unwrap_or(defaults.caption_prompt),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            embedding_dim: std::env::var("EMBEDDING_DIM")
                .ok()
                .and_then(|s| s.parse().ok()),
            chroma_url: std::env::var("CHROMA_URL").unwrap_or(defaults.chroma_url),
            chroma_collection: std::env::var("CHROMA_COLLECTION")
                .unwrap_or(defaults.chroma_collection),
            timeout: Duration::from_secs(
                std::env::var("ML_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        }
    }

    /// Build the shared HTTP client.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder().timeout(self.timeout).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MlClientConfig::default();
        assert_eq!(config.ollama_url, "http://localhost:11434");
        assert_eq!(config.caption_model, "llava");
        assert_eq!(config.chroma_collection, "video_frames");
        assert_eq!(config.embedding_dim, None);
        assert_eq!(config.timeout, Duration::from_secs(120));
    }
}

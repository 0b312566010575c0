//! API configuration.

use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Redis URL for the progress store and event bus
    pub redis_url: String,
    /// Prefix of viewer-facing frame URLs
    pub frame_url_prefix: String,
    /// Idle time after which a viewer is pinged
    pub heartbeat_interval: Duration,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            redis_url: "redis://localhost:6379".to_string(),
            frame_url_prefix: "/frames".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8000),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["*".to_string()]),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            frame_url_prefix: std::env::var("FRAME_URL_PREFIX")
                .unwrap_or_else(|_| "/frames".to_string()),
            heartbeat_interval: Duration::from_secs(
                std::env::var("WS_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(30),
            ),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(!config.is_production());
    }

    #[test]
    fn test_is_production_ignores_case() {
        let config = ApiConfig {
            environment: "Production".to_string(),
            ..ApiConfig::default()
        };
        assert!(config.is_production());
    }
}

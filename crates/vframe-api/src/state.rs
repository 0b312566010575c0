//! Application state.

use std::sync::Arc;

use vframe_models::FrameUrls;
use vframe_progress::{EventBus, ProgressResult, ProgressStore, RedisEventBus, RedisProgressStore};

use crate::config::ApiConfig;
use crate::gateway::ProgressGateway;
use crate::registry::ConnectionRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn ProgressStore>,
    pub gateway: Arc<ProgressGateway>,
}

impl AppState {
    /// Create state backed by Redis.
    pub fn new(config: ApiConfig) -> ProgressResult<Self> {
        let urls = FrameUrls::new(config.frame_url_prefix.clone());
        let store = Arc::new(RedisProgressStore::new(&config.redis_url, urls)?);
        let bus = Arc::new(RedisEventBus::new(&config.redis_url)?);
        Ok(Self::with_backends(config, store, bus))
    }

    /// Create state over explicit store and bus implementations.
    pub fn with_backends(
        config: ApiConfig,
        store: Arc<dyn ProgressStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let gateway = ProgressGateway::new(
            Arc::clone(&store),
            bus,
            Arc::new(ConnectionRegistry::new()),
            config.heartbeat_interval,
        );

        Self {
            config,
            store,
            gateway: Arc::new(gateway),
        }
    }
}

//! API routes.

use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::state::AppState;
use crate::ws::ws_progress;

/// CORS for the configured origins; `*` allows any origin without credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_origin(Any)
            .max_age(std::time::Duration::from_secs(600))
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_origin(origins)
            .max_age(std::time::Duration::from_secs(600))
    }
}

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let ws_routes = Router::new().route("/ws/progress/:job_id", get(ws_progress));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use vframe_models::FrameUrls;
    use vframe_progress::{InMemoryEventBus, InMemoryProgressStore};

    use crate::config::ApiConfig;

    fn router() -> Router {
        let state = AppState::with_backends(
            ApiConfig::default(),
            Arc::new(InMemoryProgressStore::new(FrameUrls::default())),
            Arc::new(InMemoryEventBus::new()),
        );
        create_router(state, None)
    }

    async fn status_of(uri: &str) -> StatusCode {
        router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        assert_eq!(status_of("/health").await, StatusCode::OK);
        assert_eq!(status_of("/healthz").await, StatusCode::OK);
        assert_eq!(status_of("/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_route_disabled_without_handle() {
        assert_eq!(status_of("/metrics").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_plain_get_on_ws_route_is_rejected() {
        assert!(status_of("/ws/progress/v1").await.is_client_error());
    }
}

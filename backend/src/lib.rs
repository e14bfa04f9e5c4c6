pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod rate_limit;
pub mod routes;
pub mod runner;
pub mod test_util;

pub use config::{Config, Mode};
pub use error::{ApiError, ErrorKind};
pub use llm::{ChatSession, GeminiClient, ModelClient, ModelReply, UpstreamError};
pub use rate_limit::{Decision, RateLimiter};
pub use runner::{BoundedRunner, RunError};

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::{middleware, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::CorsConfig;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Upstream language model.
    pub model_client: Arc<dyn ModelClient>,
    /// Deadline guard for upstream calls.
    pub runner: BoundedRunner,
    /// Per-client request quota, shared by every request.
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, model_client: Arc<dyn ModelClient>) -> Self {
        let runner = BoundedRunner::new(config.request_timeout);
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max_requests,
            config.rate_limit.window,
        ));
        Self {
            config,
            model_client,
            runner,
            rate_limiter,
        }
    }
}

/// Build the CORS layer from the configured allow-list.
pub fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    if cors.allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Build the full application router.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new().nest("/api", routes::router(state.clone()));

    if let Some(dir) = &state.config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(cors_layer(&state.config.cors))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(TraceLayer::new_for_http())
}

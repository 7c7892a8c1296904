//! Router configuration.
//!
//! ```text
//! /health              - Health check
//! /?{pipeline}         - Master document of the served root
//! /{*path}?{pipeline}  - Any target, through the pipeline in the query
//! ```
//!
//! ```ignore
//! let router = create_router(resolver, RouterConfig::new().with_cache_max_age(60));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{health_handler, master_handler, target_handler, AppState};
use crate::pipeline::Resolver;

/// Preflight results may be cached by browsers for a day.
const CORS_MAX_AGE: Duration = Duration::from_secs(86400);

/// Which cross-origin callers may read responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    AnyOrigin,
    /// Listed origins only; an empty list disables cross-origin access
    Origins(Vec<String>),
}

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub cors: CorsPolicy,

    /// Cache-Control max-age of successful responses, in seconds
    pub cache_max_age: u32,

    /// Wrap the router in a request tracing layer
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Any origin, one hour max-age, tracing on.
    pub fn new() -> Self {
        Self {
            cors: CorsPolicy::AnyOrigin,
            cache_max_age: 3600,
            enable_tracing: true,
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors = CorsPolicy::Origins(origins);
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

/// Create the application router around `resolver`.
pub fn create_router(resolver: Arc<Resolver>, config: RouterConfig) -> Router {
    let state = AppState::with_cache_max_age(resolver, config.cache_max_age);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/", get(master_handler))
        .route("/{*path}", get(target_handler))
        .with_state(state)
        .layer(cors_layer(&config.cors));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn cors_layer(policy: &CorsPolicy) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([CACHE_CONTROL])
        .max_age(CORS_MAX_AGE);

    match policy {
        CorsPolicy::AnyOrigin => layer.allow_origin(AllowOrigin::any()),
        CorsPolicy::Origins(origins) if origins.is_empty() => layer,
        CorsPolicy::Origins(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect();
            layer.allow_origin(AllowOrigin::list(allowed))
        }
    }
}

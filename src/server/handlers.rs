//! HTTP request handlers.
//!
//! # Endpoints
//!
//! - `GET /{*path}?{pipeline}` - Resolve a target through a pipeline
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    extract::{Path, RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{PipelineError, TilesetError};
use crate::pipeline::{Resolved, Resolver};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Resolves targets through memoized pipelines
    pub resolver: Arc<Resolver>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,
}

impl AppState {
    pub fn with_cache_max_age(resolver: Arc<Resolver>, cache_max_age: u32) -> Self {
        Self {
            resolver,
            cache_max_age,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_operation")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Pipeline error rendered as an HTTP response.
///
/// 5xx responses carry a generic message; the details only go to the log.
pub struct HandlerError(pub PipelineError);

impl From<PipelineError> for HandlerError {
    fn from(err: PipelineError) -> Self {
        HandlerError(err)
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let err = &self.0;
        let (status, error_type) = if err.is_not_found() {
            (StatusCode::NOT_FOUND, "not_found")
        } else {
            match err {
                PipelineError::InvalidOperation { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_operation")
                }
                PipelineError::Tileset(TilesetError::StructuralViolation(_)) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "structural_violation")
                }
                PipelineError::Tileset(TilesetError::InvalidArgument(_)) => {
                    (StatusCode::BAD_REQUEST, "invalid_argument")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            }
        };

        let message = if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                err
            );
            "The request could not be processed".to_string()
        } else {
            if status == StatusCode::NOT_FOUND {
                debug!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Resource not found: {}",
                    err
                );
            } else {
                warn!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Client error: {}",
                    err
                );
            }
            err.to_string()
        };

        let body = ErrorResponse::with_status(error_type, message, status);
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle target requests.
///
/// # Endpoint
///
/// `GET /{*path}?{pipeline}`
///
/// The raw query string is the pipeline specification, e.g.
/// `/city/tileset.json?fetch&exponential:1:2:160`. Tileset documents are
/// returned as `application/json`, everything else as
/// `application/octet-stream`.
pub async fn target_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, HandlerError> {
    resolve(state, path, query.unwrap_or_default()).await
}

/// Handle requests for the served root's master document.
///
/// # Endpoint
///
/// `GET /?{pipeline}`
pub async fn master_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, HandlerError> {
    resolve(state, String::new(), query.unwrap_or_default()).await
}

async fn resolve(state: AppState, target: String, spec: String) -> Result<Response, HandlerError> {
    // Resolution runs detached so a disconnecting client does not abandon
    // work that other requests may be waiting on.
    let resolver = Arc::clone(&state.resolver);
    let resolved = tokio::spawn(async move { resolver.resolve(&target, &spec).await })
        .await
        .map_err(|e| PipelineError::UpstreamFailure(format!("resolution task failed: {}", e)))??;

    let content_type = match resolved {
        Resolved::Json(_) => "application/json",
        Resolved::Binary(_) => "application/octet-stream",
    };
    let body = resolved.into_bytes()?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", state.cache_max_age),
            ),
        ],
        body,
    )
        .into_response())
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

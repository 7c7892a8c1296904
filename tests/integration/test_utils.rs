//! Test utilities for integration tests.
//!
//! This module provides a mock tile source with request tracking and helpers
//! for building fixture tilesets and issuing requests against the router.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use tokio::sync::RwLock;
use tower::ServiceExt;

use tileset_streamer::error::IoError;
use tileset_streamer::pipeline::{BuildContext, PipelineBuilder, Resolver};
use tileset_streamer::source::TileSource;
use tileset_streamer::tileset::{Node, Region, Tileset};
use tileset_streamer::{create_router, RouterConfig};

// =============================================================================
// Mock Tile Source with Request Tracking
// =============================================================================

/// A tile source serving pre-configured resources from memory.
///
/// Every fetch is counted per identifier, so tests can verify that shared
/// work really is shared.
pub struct MockTileSource {
    resources: HashMap<String, Bytes>,
    request_counts: Arc<RwLock<HashMap<String, usize>>>,
    delay: Option<Duration>,
}

impl MockTileSource {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
            request_counts: Arc::new(RwLock::new(HashMap::new())),
            delay: None,
        }
    }

    pub fn with_resource(mut self, id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.resources.insert(id.into(), data.into());
        self
    }

    pub fn with_tileset(self, id: impl Into<String>, tileset: &Tileset) -> Self {
        let data = tileset.to_vec().unwrap();
        self.with_resource(id, data)
    }

    /// Make every fetch take `delay`, so concurrent requests overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared handle on the request counters, usable after the source moved.
    pub fn counter(&self) -> RequestCounter {
        RequestCounter(Arc::clone(&self.request_counts))
    }
}

impl Default for MockTileSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TileSource for MockTileSource {
    async fn fetch(&self, id: &str) -> Result<Bytes, IoError> {
        {
            let mut counts = self.request_counts.write().await;
            *counts.entry(id.to_string()).or_insert(0) += 1;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.resources.get(id) {
            Some(data) => Ok(data.clone()),
            None => Err(IoError::NotFound(id.to_string())),
        }
    }

    fn identifier(&self) -> &str {
        "mock://tiles"
    }
}

#[derive(Clone)]
pub struct RequestCounter(Arc<RwLock<HashMap<String, usize>>>);

impl RequestCounter {
    pub async fn get(&self, id: &str) -> usize {
        self.0.read().await.get(id).copied().unwrap_or(0)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn region() -> Region {
    [0.0, 0.0, 1.0, 1.0, 0.0, 100.0]
}

/// One grid cell, `x`/`y` in 0..16.
pub fn cell(x: usize, y: usize) -> Region {
    let step = 1.0 / 16.0;
    [
        x as f64 * step,
        y as f64 * step,
        (x + 1) as f64 * step,
        (y + 1) as f64 * step,
        0.0,
        100.0,
    ]
}

/// `city/tileset.json` with two payloads and a nested document
/// `city/sub/tileset.json` holding one more payload.
pub fn city_source() -> MockTileSource {
    let nested = Tileset::new(Node::inner(
        region(),
        8.0,
        vec![Node::leaf(region(), 0.0, "n.b3dm")],
    ));
    let master = Tileset::new(Node::inner(
        region(),
        16.0,
        vec![
            Node::leaf(region(), 0.0, "0.b3dm"),
            Node::leaf(region(), 0.0, "1.b3dm"),
            Node::leaf(region(), 0.0, "sub/tileset.json"),
        ],
    ));

    MockTileSource::new()
        .with_tileset("city/tileset.json", &master)
        .with_tileset("city/sub/tileset.json", &nested)
        .with_resource("city/0.b3dm", Bytes::from_static(b"zero"))
        .with_resource("city/1.b3dm", Bytes::from_static(b"one"))
        .with_resource("city/sub/n.b3dm", Bytes::from_static(b"nested"))
}

/// A flat `tileset.json` over `count` leaves `tiles/{i}.b3dm`.
pub fn grid_source(count: usize) -> MockTileSource {
    let children = (0..count)
        .map(|i| Node::leaf(cell(i % 16, i / 16), 0.0, format!("tiles/{}.b3dm", i)))
        .collect();
    let master = Tileset::new(Node::inner(region(), 10.0, children));
    MockTileSource::new().with_tileset("tileset.json", &master)
}

// =============================================================================
// Router Helpers
// =============================================================================

pub fn resolver_for(source: MockTileSource) -> Arc<Resolver> {
    let context = BuildContext::new(Arc::new(source));
    Arc::new(Resolver::new(Arc::new(PipelineBuilder::new(context))))
}

pub fn router_for(source: MockTileSource) -> Router {
    create_router(resolver_for(source), RouterConfig::new().with_tracing(false))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn tileset(&self) -> Tileset {
        Tileset::from_slice(&self.body).unwrap()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn get(router: &Router, uri: &str) -> TestResponse {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}

//! API integration tests for target resolution and error handling.
//!
//! Tests verify:
//! - Master and payload retrieval, with and without pipelines
//! - Error cases (missing target, unknown filter, structural violation)
//! - HTTP response codes and headers

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use tileset_streamer::tileset::{count_leaves, nodes, Node, Refine, Tileset};

use super::test_utils::{city_source, get, grid_source, region, router_for, MockTileSource};

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let router = router_for(city_source());
    let response = get(&router, "/health").await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_cors_allows_any_origin_by_default() {
    let router = router_for(city_source());
    let request = Request::builder()
        .uri("/city/tileset.json")
        .header("origin", "https://viewer.example")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

// =============================================================================
// Plain Retrieval
// =============================================================================

#[tokio::test]
async fn test_document_without_pipeline() {
    let router = router_for(city_source());
    let response = get(&router, "/city/tileset.json").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.headers.get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(
        response.headers.get("cache-control").unwrap(),
        "public, max-age=3600"
    );
    assert_eq!(response.tileset().root.children.len(), 3);
}

#[tokio::test]
async fn test_directory_target_serves_master() {
    let router = router_for(city_source());
    let response = get(&router, "/city/").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.tileset().root.geometric_error, 16.0);
}

#[tokio::test]
async fn test_root_serves_master() {
    let router = router_for(grid_source(4));
    let response = get(&router, "/").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(count_leaves(&response.tileset().root), 4);
}

#[tokio::test]
async fn test_payload_is_binary() {
    let router = router_for(city_source());
    let response = get(&router, "/city/0.b3dm?fetch&exponential:1:2").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.headers.get("content-type").unwrap(),
        "application/octet-stream"
    );
    assert_eq!(&response.body[..], b"zero");
}

// =============================================================================
// Pipelines
// =============================================================================

#[tokio::test]
async fn test_fetch_inlines_nested_documents() {
    let router = router_for(city_source());
    let response = get(&router, "/city/tileset.json?fetch").await;

    assert_eq!(response.status, StatusCode::OK);
    let tileset = response.tileset();
    let uris: Vec<&str> = nodes(&tileset.root)
        .filter_map(|node| node.content_uri())
        .collect();
    assert_eq!(uris, vec!["0.b3dm", "1.b3dm", "sub/n.b3dm"]);
}

#[tokio::test]
async fn test_exponential_then_grow_root() {
    let router = router_for(city_source());
    let response = get(
        &router,
        "/city/tileset.json?fetch&exponential:1:2&growRoot:500",
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    let tileset = response.tileset();
    assert_eq!(tileset.root.geometric_error, 500.0);
    assert_eq!(tileset.root.refine, Some(Refine::Add));
    assert_eq!(tileset.root.children.len(), 1);
    assert_eq!(tileset.root.children[0].geometric_error, 8.0);
}

#[tokio::test]
async fn test_strip_version() {
    let router = router_for(city_source());
    let response = get(&router, "/city/tileset.json?stripVersion").await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert!(body["asset"].get("version").is_none());
}

#[tokio::test]
async fn test_separator_aliases() {
    let router = router_for(city_source());
    let colon = get(&router, "/city/tileset.json?fetch&exponential:1:2").await;
    let equals = get(&router, "/city/tileset.json?fetch&exponential=1=2").await;
    let encoded = get(&router, "/city/tileset.json?fetch&exponential%3A1%3A2").await;

    assert_eq!(colon.status, StatusCode::OK);
    assert_eq!(colon.body, equals.body);
    assert_eq!(colon.body, encoded.body);
}

#[tokio::test]
async fn test_quick_tree_over_flat_grid() {
    let router = router_for(grid_source(64));
    let response = get(&router, "/tileset.json?quickTree:3").await;

    assert_eq!(response.status, StatusCode::OK);
    let tileset = response.tileset();
    assert_eq!(count_leaves(&tileset.root), 64);
    assert_eq!(tileset.root.children.len(), 8);
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_missing_target() {
    let router = router_for(city_source());
    let response = get(&router, "/city/missing.json").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let body = response.json();
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_unknown_filter_rejected() {
    let router = router_for(city_source());
    let response = get(&router, "/city/tileset.json?fetch&frobnicate").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_operation");
}

#[tokio::test]
async fn test_invalid_argument_rejected() {
    let router = router_for(city_source());
    let response = get(&router, "/city/tileset.json?exponential:abc").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_operation");
}

#[tokio::test]
async fn test_source_selection_rejected() {
    let router = router_for(city_source());
    let response = get(&router, "/city/tileset.json?src:other").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_grow_root_below_current_error() {
    let router = router_for(city_source());
    let response = get(&router, "/city/tileset.json?growRoot:1").await;

    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json()["error"], "structural_violation");
}

#[tokio::test]
async fn test_fetch_cycle_rejected() {
    let loop_a = Tileset::new(Node::inner(
        region(),
        4.0,
        vec![Node::leaf(region(), 0.0, "b/tileset.json")],
    ));
    let loop_b = Tileset::new(Node::inner(
        region(),
        2.0,
        vec![Node::leaf(region(), 0.0, "../tileset.json")],
    ));
    let source = MockTileSource::new()
        .with_tileset("loop/tileset.json", &loop_a)
        .with_tileset("loop/b/tileset.json", &loop_b);
    let router = router_for(source);

    let response = get(&router, "/loop/tileset.json?fetch").await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json()["error"], "structural_violation");

    // The server keeps answering after rejecting the cycle.
    let health = get(&router, "/health").await;
    assert_eq!(health.status, StatusCode::OK);
}

//! Shared-work integration tests.
//!
//! Tests verify:
//! - Concurrent identical requests through a cache stage hit the source once
//! - Pipelines sharing a prefix share the prefix's stages
//! - Split tables are built once per master

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use tileset_streamer::pipeline::parse_pipeline;
use tileset_streamer::tileset::{count_leaves, nodes};
use tileset_streamer::{create_router, RouterConfig};

use super::test_utils::{city_source, get, grid_source, resolver_for, router_for};

#[tokio::test]
async fn test_repeated_requests_without_cache_hit_source() {
    let source = city_source();
    let counter = source.counter();
    let router = router_for(source);

    for _ in 0..3 {
        let response = get(&router, "/city/tileset.json?stripVersion").await;
        assert_eq!(response.status, StatusCode::OK);
    }
    assert_eq!(counter.get("city/tileset.json").await, 3);
}

#[tokio::test]
async fn test_cache_stage_serves_repeats() {
    let source = city_source();
    let counter = source.counter();
    let router = router_for(source);

    for _ in 0..3 {
        let response = get(&router, "/city/tileset.json?cache:10&stripVersion").await;
        assert_eq!(response.status, StatusCode::OK);
    }
    assert_eq!(counter.get("city/tileset.json").await, 1);
}

#[tokio::test]
async fn test_concurrent_requests_coalesce() {
    let source = city_source().with_delay(Duration::from_millis(50));
    let counter = source.counter();
    let router = router_for(source);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            get(&router, "/city/tileset.json?fetch&cache:10").await
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(count_leaves(&response.tileset().root), 3);
    }

    assert_eq!(counter.get("city/tileset.json").await, 1);
    assert_eq!(counter.get("city/sub/tileset.json").await, 1);
}

#[tokio::test]
async fn test_shared_prefix_shares_cache() {
    let source = city_source();
    let counter = source.counter();
    let router = router_for(source);

    let a = get(&router, "/city/tileset.json?cache:10&exponential:1:2").await;
    let b = get(&router, "/city/tileset.json?cache:10&stripVersion").await;
    assert_eq!(a.status, StatusCode::OK);
    assert_eq!(b.status, StatusCode::OK);

    assert_eq!(counter.get("city/tileset.json").await, 1);
}

#[tokio::test]
async fn test_pipelines_are_memoized() {
    let resolver = resolver_for(city_source());
    let operations = parse_pipeline("fetch&exponential:1:2").unwrap();

    let first = resolver.builder().build(&operations).await.unwrap();
    let second = resolver.builder().build(&operations).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let prefix = resolver.builder().build(&operations[..1]).await.unwrap();
    let again = resolver.builder().build(&operations[..1]).await.unwrap();
    assert!(Arc::ptr_eq(&prefix, &again));
}

#[tokio::test]
async fn test_split_documents_share_one_table() {
    let source = grid_source(100);
    let counter = source.counter();
    let router = create_router(resolver_for(source), RouterConfig::new().with_tracing(false));

    // A numbered document first: the master is built on demand.
    let part = get(&router, "/part3.json?split:1:part").await;
    assert_eq!(part.status, StatusCode::OK);
    assert_eq!(count_leaves(&part.tileset().root), 10);

    let master = get(&router, "/tileset.json?split:1:part").await;
    assert_eq!(master.status, StatusCode::OK);
    let master = master.tileset();
    let uris: Vec<&str> = nodes(&master.root)
        .filter_map(|node| node.content_uri())
        .collect();
    assert_eq!(uris.len(), 10);
    assert_eq!(uris[0], "part1.json");

    assert_eq!(counter.get("tileset.json").await, 1);
}

#[tokio::test]
async fn test_split_then_fetch_restores_leaves() {
    let router = router_for(grid_source(100));
    let response = get(&router, "/tileset.json?split:1:part&fetch").await;

    assert_eq!(response.status, StatusCode::OK);
    let tileset = response.tileset();
    assert_eq!(count_leaves(&tileset.root), 100);
    assert!(nodes(&tileset.root)
        .filter_map(|node| node.content_uri())
        .all(|uri| uri.ends_with(".b3dm")));
}

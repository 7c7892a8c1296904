//! Batch tool integration tests.
//!
//! Tests verify:
//! - Merged directories can be served and flattened
//! - Split output on disk reassembles to the original leaf set
//! - Filtering a file applies the whole pipeline

use std::path::Path;
use std::sync::Arc;

use tileset_streamer::pipeline::{parse_pipeline, BuildContext, PipelineBuilder, Resolved, Resolver};
use tileset_streamer::source::{open_source, FileSource, SourceOptions};
use tileset_streamer::tileset::{count_leaves, nodes, Node, Tileset};
use tileset_streamer::tools;

use super::test_utils::{cell, region};

fn write_tileset(path: &Path, tileset: &Tileset) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, tileset.to_vec().unwrap()).unwrap();
}

fn grid(count: usize) -> Tileset {
    let children = (0..count)
        .map(|i| Node::leaf(cell(i % 16, i / 16), 0.0, format!("tiles/{}.b3dm", i)))
        .collect();
    Tileset::new(Node::inner(region(), 10.0, children))
}

fn file_resolver(dir: &Path) -> Resolver {
    let context = BuildContext::new(Arc::new(FileSource::new(dir)));
    Resolver::new(Arc::new(PipelineBuilder::new(context)))
}

async fn resolve_json(resolver: &Resolver, target: &str, spec: &str) -> Arc<Tileset> {
    match resolver.resolve(target, spec).await.unwrap() {
        Resolved::Json(tileset) => tileset,
        Resolved::Binary(_) => panic!("expected a tileset document"),
    }
}

#[tokio::test]
async fn test_merge_then_serve() {
    let dir = tempfile::tempdir().unwrap();
    write_tileset(
        &dir.path().join("a/tileset.json"),
        &Tileset::new(Node::leaf(cell(0, 0), 1.0, "a.b3dm")),
    );
    write_tileset(
        &dir.path().join("b/tileset.json"),
        &Tileset::new(Node::leaf(cell(1, 0), 1.0, "b.b3dm")),
    );

    let path = tools::merge_directory(dir.path(), "tileset.json", 1000.0)
        .await
        .unwrap();
    assert_eq!(path, dir.path().join("tileset.json"));

    let merged = resolve_json(&file_resolver(dir.path()), "", "").await;
    assert_eq!(merged.root.children.len(), 2);
    assert_eq!(merged.root.geometric_error, 1000.0);
    let uris: Vec<&str> = nodes(&merged.root)
        .filter_map(|node| node.content_uri())
        .collect();
    assert_eq!(uris, vec!["a/a.b3dm", "b/b.b3dm"]);
}

#[tokio::test]
async fn test_merged_directory_source() {
    let dir = tempfile::tempdir().unwrap();
    write_tileset(
        &dir.path().join("a/tileset.json"),
        &Tileset::new(Node::leaf(cell(0, 0), 1.0, "a.b3dm")),
    );
    write_tileset(
        &dir.path().join("b/tileset.json"),
        &Tileset::new(Node::leaf(cell(1, 0), 1.0, "b.b3dm")),
    );

    let location = format!("merge:{}", dir.path().display());
    let source = open_source(&location, &SourceOptions::default())
        .await
        .unwrap();
    let resolver = Resolver::new(Arc::new(PipelineBuilder::new(BuildContext::new(source))));

    let merged = resolve_json(&resolver, "", "exponential:1:2").await;
    assert_eq!(count_leaves(&merged.root), 2);
    assert_eq!(merged.root.geometric_error, 2.0);
}

#[tokio::test]
async fn test_split_to_disk_reassembles() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let source = input.path().join("tileset.json");
    write_tileset(&source, &grid(64));

    let documents = tools::split_to_disk(&source, output.path(), 1, "part", "tileset.json")
        .await
        .unwrap();
    assert_eq!(documents, 8);
    assert!(output.path().join("part1.json").exists());

    let flattened = resolve_json(&file_resolver(output.path()), "tileset.json", "fetch").await;
    assert_eq!(count_leaves(&flattened.root), 64);
}

#[tokio::test]
async fn test_filter_file_applies_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let nested = Tileset::new(Node::leaf(region(), 0.0, "n.b3dm"));
    let master = Tileset::new(Node::inner(
        region(),
        16.0,
        vec![
            Node::leaf(region(), 0.0, "0.b3dm"),
            Node::leaf(region(), 0.0, "sub/tileset.json"),
        ],
    ));
    write_tileset(&dir.path().join("tileset.json"), &master);
    write_tileset(&dir.path().join("sub/tileset.json"), &nested);

    let destination = dir.path().join("out/filtered.json");
    let operations = parse_pipeline("fetch&exponential:1:2&stripVersion").unwrap();
    tools::filter_file(&dir.path().join("tileset.json"), &destination, &operations)
        .await
        .unwrap();

    let written = Tileset::from_slice(&std::fs::read(&destination).unwrap()).unwrap();
    assert_eq!(count_leaves(&written.root), 2);
    assert_eq!(written.root.geometric_error, 4.0);
    assert_eq!(written.geometric_error, 4.0);
}

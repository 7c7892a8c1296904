//! # Tileset Streamer
//!
//! On-the-fly transformation of 3D Tiles tilesets.
//!
//! A client requests a tileset document or tile payload together with a
//! pipeline in the query string (`/city/tileset.json?fetch&exponential:1:2`).
//! The server builds the pipeline once, memoizes it by its operation list,
//! and streams the transformed resource. The same pipelines drive a set of
//! batch tools that write results to disk.
//!
//! ## Features
//!
//! - **Composable filters**: inline nested documents, reassign geometric
//!   errors, rebuild or split hierarchies, recompress meshes, shift heights
//! - **Shared work**: prefix-sharing pipelines and single-flight caches, so
//!   concurrent requests for the same resource compute it once
//! - **Several stores**: local directories, zip archives, merged directories,
//!   S3 and HTTP origins
//!
//! ## Architecture
//!
//! - [`tileset`] - Tileset document model and tree primitives
//! - [`cache`] - Single-flight keyed caches, in memory and on disk
//! - [`source`] - Terminal stores pipelines read from
//! - [`filters`] - The filter catalog
//! - [`pipeline`] - Operation parsing, pipeline building and request resolution
//! - [`server`] - Axum-based HTTP server and routes
//! - [`tools`] - Batch tools (materialize, merge, split, download, filter)
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tileset_streamer::{
//!     create_router, BuildContext, FileSource, PipelineBuilder, Resolver, RouterConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let context = BuildContext::new(Arc::new(FileSource::new("/data/city")));
//!     let resolver = Arc::new(Resolver::new(Arc::new(PipelineBuilder::new(context))));
//!     let router = create_router(resolver, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod filters;
pub mod pipeline;
pub mod server;
pub mod source;
pub mod tileset;
pub mod tools;

// Re-export commonly used types
pub use cache::{namespace_dir, CachePolicy, CacheStats, KeyedCache, PersistentCache, SingleFlight};
pub use config::{
    Cli, Command, DownloadConfig, FilterConfig, MaterializeConfig, MergeConfig, PipelineOptions,
    ServeConfig, SplitConfig,
};
pub use error::{IoError, PipelineError, TilesetError};
pub use filters::{Filter, FilterKind};
pub use pipeline::{
    parse_pipeline, BuildContext, FilterContext, Operation, PipelineBuilder, Resolved, Resolver,
    Resource, Stage,
};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use source::{open_source, FileSource, SourceOptions, TileSource};
pub use tileset::{Node, Region, Tileset};

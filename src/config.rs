//! Configuration management for Tileset Streamer.
//!
//! This module provides the command-line interface:
//! - Command-line arguments via clap
//! - Environment variables with `TILESET_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Commands
//!
//! - `serve` - Serve a tileset root over HTTP with on-the-fly pipelines
//! - `materialize` - Write a pipeline's output tree to disk
//! - `merge` - Merge sibling tilesets in a directory into one master
//! - `split` - Split a tileset into a master and sub-documents
//! - `download` - Copy a remote tileset's documents to disk
//! - `filter` - Run a pipeline over one tileset file
//!
//! # Environment Variables
//!
//! - `TILESET_HOST` - Server bind address (default: 0.0.0.0)
//! - `TILESET_PORT` - Server port (default: 3000)
//! - `TILESET_ROOT` - Location of the served tileset root
//! - `TILESET_MASTER_NAME` - Master document name (default: tileset.json)
//! - `TILESET_CACHE_DIR` - Root directory of persistent caches
//! - `TILESET_PIPELINE_CACHE` - Built pipelines kept in memory (default: 64)
//! - `TILESET_COMPRESSOR` - Mesh compressor program (default: gltf-pipeline)
//! - `TILESET_HEIGHT` - Height above the ellipsoid for `zshift:auto` (default: 47)
//! - `TILESET_LENIENT` - Skip unknown filters instead of failing (default: false)
//! - `TILESET_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `TILESET_S3_REGION` - AWS region (default: us-east-1)
//! - `TILESET_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `TILESET_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::filters::{DEFAULT_COMPRESSOR_PROGRAM, DEFAULT_HEIGHT_CORRECTION};
use crate::pipeline::DEFAULT_MASTER_NAME;
use crate::source::{SourceOptions, DEFAULT_MERGE_GEOMETRIC_ERROR};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default number of built pipelines kept in memory.
pub const DEFAULT_PIPELINE_CACHE_CAPACITY: usize = 64;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tileset Streamer - on-the-fly transformation of 3D Tiles tilesets.
#[derive(Parser, Debug, Clone)]
#[command(name = "tileset-streamer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve a tileset root over HTTP.
    Serve(ServeConfig),
    /// Resolve a tileset through a pipeline and write the whole tree to disk.
    Materialize(MaterializeConfig),
    /// Merge every tileset in a directory under one master document.
    Merge(MergeConfig),
    /// Split a tileset into a master and numbered sub-documents.
    Split(SplitConfig),
    /// Copy a remote tileset's documents to disk.
    Download(DownloadConfig),
    /// Run a pipeline over a single tileset file.
    Filter(FilterConfig),
}

/// Options shared by every command that opens a source and builds pipelines.
#[derive(Args, Debug, Clone)]
pub struct PipelineOptions {
    /// Name of the master document of a directory.
    #[arg(long, default_value = DEFAULT_MASTER_NAME, env = "TILESET_MASTER_NAME")]
    pub master_name: String,

    /// Root directory of persistent caches.
    ///
    /// Defaults to a directory under the system temp dir.
    #[arg(long, env = "TILESET_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// External mesh compressor used by the `draco` filter.
    #[arg(long, default_value = DEFAULT_COMPRESSOR_PROGRAM, env = "TILESET_COMPRESSOR")]
    pub compressor: PathBuf,

    /// Height of the ellipsoid above the geoid used by `zshift:auto`, in meters.
    #[arg(long, default_value_t = DEFAULT_HEIGHT_CORRECTION, env = "TILESET_HEIGHT")]
    pub height: f64,

    /// Skip unknown filters instead of rejecting the pipeline.
    #[arg(long, default_value_t = false, env = "TILESET_LENIENT")]
    pub lenient: bool,

    /// Geometric error of the root synthesized for `merge:` sources.
    #[arg(long, default_value_t = DEFAULT_MERGE_GEOMETRIC_ERROR)]
    pub merge_geometric_error: f64,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "TILESET_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "TILESET_S3_REGION")]
    pub s3_region: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.master_name.is_empty() || self.master_name.contains('/') {
            return Err("master_name must be a plain file name".to_string());
        }
        if !self.height.is_finite() {
            return Err("height must be a finite number".to_string());
        }
        if !self.merge_geometric_error.is_finite() || self.merge_geometric_error < 0.0 {
            return Err("merge_geometric_error must be a non-negative number".to_string());
        }
        Ok(())
    }

    /// Options for opening the source location.
    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            s3_endpoint: self.s3_endpoint.clone(),
            s3_region: Some(self.s3_region.clone()),
            merge_geometric_error: Some(self.merge_geometric_error),
            master_name: Some(self.master_name.clone()),
        }
    }
}

/// Configuration for the `serve` command.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Location of the served root: directory, `.zip`, `merge:<dir>`,
    /// `s3://bucket/prefix` or an http(s) URL.
    #[arg(long, env = "TILESET_ROOT")]
    pub root: String,

    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "TILESET_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TILESET_PORT")]
    pub port: u16,

    /// Maximum number of built pipelines to keep in memory.
    #[arg(long, default_value_t = DEFAULT_PIPELINE_CACHE_CAPACITY, env = "TILESET_PIPELINE_CACHE")]
    pub pipeline_cache: usize,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "TILESET_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "TILESET_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,

    #[command(flatten)]
    pub pipeline: PipelineOptions,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.root.is_empty() {
            return Err("Tileset root is required. Set --root or TILESET_ROOT".to_string());
        }
        if self.pipeline_cache == 0 {
            return Err("pipeline_cache must be greater than 0".to_string());
        }
        self.pipeline.validate()
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the `materialize` command.
#[derive(Args, Debug, Clone)]
pub struct MaterializeConfig {
    /// Location of the input root (same forms as `serve --root`).
    #[arg(long)]
    pub root: String,

    /// Output directory.
    #[arg(long)]
    pub out: PathBuf,

    /// Pipeline specification, e.g. `fetch&exponential:1:2:160`.
    #[arg(long, default_value = "")]
    pub pipeline: String,

    /// Document to start from (defaults to the master document).
    #[arg(long, default_value = "")]
    pub target: String,

    #[command(flatten)]
    pub options: PipelineOptions,
}

/// Configuration for the `merge` command.
#[derive(Args, Debug, Clone)]
pub struct MergeConfig {
    /// Directory holding the tilesets to merge.
    pub dir: PathBuf,

    /// Geometric error of the synthesized root.
    #[arg(long, default_value_t = DEFAULT_MERGE_GEOMETRIC_ERROR)]
    pub geometric_error: f64,

    /// Name of the master document to write.
    #[arg(long, default_value = DEFAULT_MASTER_NAME)]
    pub master_name: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl MergeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.geometric_error.is_finite() || self.geometric_error < 0.0 {
            return Err("geometric_error must be a non-negative number".to_string());
        }
        Ok(())
    }
}

/// Configuration for the `split` command.
#[derive(Args, Debug, Clone)]
pub struct SplitConfig {
    /// Tileset document to split.
    pub source: PathBuf,

    /// Output directory.
    #[arg(long)]
    pub out: PathBuf,

    /// Number of document levels to introduce.
    #[arg(long, default_value_t = 1)]
    pub count: u32,

    /// Prefix of the sub-document names.
    #[arg(long, default_value = "")]
    pub name: String,

    /// Name of the master document to write.
    #[arg(long, default_value = DEFAULT_MASTER_NAME)]
    pub master_name: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl SplitConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.count == 0 {
            return Err("count must be greater than 0".to_string());
        }
        if self.name.contains('/') {
            return Err("name must not contain '/'".to_string());
        }
        Ok(())
    }
}

/// Configuration for the `download` command.
#[derive(Args, Debug, Clone)]
pub struct DownloadConfig {
    /// URL of the master document.
    pub url: String,

    /// Output directory.
    #[arg(long)]
    pub out: PathBuf,

    /// Name to write the master document under.
    #[arg(long, default_value = DEFAULT_MASTER_NAME)]
    pub master_name: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl DownloadConfig {
    pub fn validate(&self) -> Result<(), String> {
        url::Url::parse(&self.url)
            .map_err(|e| format!("invalid url '{}': {}", self.url, e))?;
        Ok(())
    }
}

/// Configuration for the `filter` command.
#[derive(Args, Debug, Clone)]
pub struct FilterConfig {
    /// Tileset document to read.
    pub source: PathBuf,

    /// File to write the result to.
    pub destination: PathBuf,

    /// Pipeline specification, e.g. `exponential:1:2&stripVersion`.
    #[arg(long)]
    pub pipeline: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================

//! Terminal stores that pipelines read from.
//!
//! A [`TileSource`] resolves an identifier (a path relative to the served
//! tileset, or an absolute URL) to raw bytes. It knows nothing about tileset
//! semantics; parsing happens in the pipeline's source stage.
//!
//! | Location                 | Adapter                  |
//! |--------------------------|--------------------------|
//! | `http://...`/`https://...` | [`HttpSource`]         |
//! | `s3://bucket/prefix`     | [`S3Source`]             |
//! | `path/to/archive.zip`    | [`ArchiveSource`]        |
//! | `merge:path/to/dir`      | [`MergedDirectorySource`] |
//! | anything else            | [`FileSource`]           |

mod archive;
mod file;
mod http;
mod merged;
mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

pub use archive::ArchiveSource;
pub use file::FileSource;
pub use http::HttpSource;
pub(crate) use http::get_bytes;
pub use merged::{merge_directory_tileset, MergedDirectorySource, DEFAULT_MERGE_GEOMETRIC_ERROR};
pub use s3::{create_s3_client, S3Source};

/// A backing store for tileset documents and tile payloads.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Read the resource named `id`.
    ///
    /// Returns `IoError::NotFound` if the resource does not exist.
    async fn fetch(&self, id: &str) -> Result<Bytes, IoError>;

    /// Human-readable location of this source (for logs).
    fn identifier(&self) -> &str;
}

/// Options used when opening a source from a location string.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Custom S3 endpoint (MinIO, LocalStack, ...)
    pub s3_endpoint: Option<String>,
    /// S3 region
    pub s3_region: Option<String>,
    /// Geometric error of the synthesized root of a merged directory
    pub merge_geometric_error: Option<f64>,
    /// Name of the master document
    pub master_name: Option<String>,
}

/// Open the adapter matching `location`.
pub async fn open_source(
    location: &str,
    options: &SourceOptions,
) -> Result<Arc<dyn TileSource>, IoError> {
    let master_name = options
        .master_name
        .clone()
        .unwrap_or_else(|| crate::pipeline::DEFAULT_MASTER_NAME.to_string());

    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(Arc::new(HttpSource::new(location)?));
    }

    if let Some(rest) = location.strip_prefix("s3://") {
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(IoError::S3(format!("missing bucket in '{}'", location)));
        }
        let region = options.s3_region.as_deref().unwrap_or("us-east-1");
        let client = create_s3_client(options.s3_endpoint.as_deref(), region).await;
        return Ok(Arc::new(S3Source::new(client, bucket, prefix)));
    }

    if let Some(dir) = location.strip_prefix("merge:") {
        let geometric_error = options
            .merge_geometric_error
            .unwrap_or(DEFAULT_MERGE_GEOMETRIC_ERROR);
        return Ok(Arc::new(MergedDirectorySource::new(
            dir,
            geometric_error,
            master_name,
        )));
    }

    if location.to_ascii_lowercase().ends_with(".zip") {
        let path = location.to_string();
        let source = tokio::task::spawn_blocking(move || ArchiveSource::open(path))
            .await
            .map_err(|e| IoError::Archive(format!("archive open task failed: {}", e)))??;
        return Ok(Arc::new(source));
    }

    Ok(Arc::new(FileSource::new(location)))
}

/// Strip a query string from an identifier.
pub(crate) fn strip_query(id: &str) -> &str {
    id.split('?').next().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_source_by_location() {
        let options = SourceOptions::default();

        let http = open_source("https://cdn.example.org/city/", &options)
            .await
            .unwrap();
        assert!(http.identifier().starts_with("https://cdn.example.org/city"));

        let merge = open_source("merge:/data/trees", &options).await.unwrap();
        assert_eq!(merge.identifier(), "merge:/data/trees");

        let file = open_source("/data/city", &options).await.unwrap();
        assert_eq!(file.identifier(), "/data/city");
    }

    #[tokio::test]
    async fn test_open_missing_archive_fails() {
        let result = open_source("/does/not/exist.zip", &SourceOptions::default()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(strip_query("a/b.json?v=1"), "a/b.json");
        assert_eq!(strip_query("a/b.json"), "a/b.json");
    }
}

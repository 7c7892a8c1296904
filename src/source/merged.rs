use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::{FileSource, TileSource};
use crate::error::{IoError, PipelineError};
use crate::tileset::{nodes_region, rebase_content, Node, Refine, Tileset};

/// Geometric error of the synthesized root when none is configured.
pub const DEFAULT_MERGE_GEOMETRIC_ERROR: f64 = 15.0;

/// Directory whose master document is synthesized from its subdirectories.
///
/// A request for the master name at the root returns the merge of every
/// immediate subdirectory's master document; all other identifiers are read
/// from disk.
pub struct MergedDirectorySource {
    files: FileSource,
    geometric_error: f64,
    master_name: String,
    identifier: String,
}

impl MergedDirectorySource {
    pub fn new(dir: impl Into<PathBuf>, geometric_error: f64, master_name: String) -> Self {
        let files = FileSource::new(dir);
        let identifier = format!("merge:{}", files.root().display());
        Self {
            files,
            geometric_error,
            master_name,
            identifier,
        }
    }
}

#[async_trait]
impl TileSource for MergedDirectorySource {
    async fn fetch(&self, id: &str) -> Result<Bytes, IoError> {
        if id.trim_start_matches('/') != self.master_name {
            return self.files.fetch(id).await;
        }

        let tileset =
            merge_directory_tileset(self.files.root(), &self.master_name, self.geometric_error)
                .await
                .map_err(|e| match e {
                    PipelineError::Io(io) => io,
                    PipelineError::NotFound(message) => IoError::NotFound(message),
                    other => IoError::Read(other.to_string()),
                })?;

        let data = tileset
            .to_vec()
            .map_err(|e| IoError::Read(e.to_string()))?;
        Ok(Bytes::from(data))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Merge the master documents of the immediate subdirectories of `dir`.
///
/// Each subdirectory's root becomes a child of a new `refine=ADD` root whose
/// region is the union of the children's. Content references are rebased
/// onto the subdirectory. Subdirectories without a readable master are
/// skipped with a warning.
pub async fn merge_directory_tileset(
    dir: &Path,
    master_name: &str,
    geometric_error: f64,
) -> Result<Tileset, PipelineError> {
    let mut subdirs = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(IoError::from)?;
    while let Some(entry) = entries.next_entry().await.map_err(IoError::from)? {
        if entry.file_type().await.map_err(IoError::from)?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                subdirs.push(name.to_string());
            }
        }
    }
    subdirs.sort();

    let mut children = Vec::new();
    for name in subdirs {
        let path = dir.join(&name).join(master_name);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping subdirectory");
                continue;
            }
        };
        let tileset = match Tileset::from_slice(&data) {
            Ok(tileset) => tileset,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unparsable tileset");
                continue;
            }
        };

        let mut root = tileset.root;
        rebase_content(&mut root, &name);
        children.push(root);
    }

    if children.is_empty() {
        return Err(PipelineError::NotFound(format!(
            "no subdirectory of {} holds a {}",
            dir.display(),
            master_name
        )));
    }

    debug!(dir = %dir.display(), children = children.len(), "Merged subdirectory tilesets");

    let region = nodes_region(children.iter())?;
    let mut root = Node::new(region, geometric_error);
    root.refine = Some(Refine::Add);
    root.children = children;

    Ok(Tileset::new(root))
}

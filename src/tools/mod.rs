//! Batch tools: drive the pipeline to write tilesets to disk.
//!
//! | Tool                 | Effect                                                 |
//! |----------------------|--------------------------------------------------------|
//! | [`materialize`]      | resolve a master and everything it references, write all |
//! | [`merge_directory`]  | write the merge of every subdirectory's master           |
//! | [`split_to_disk`]    | write a master and its balanced numbered documents       |
//! | [`download`]         | copy a remote tileset's documents, relink payloads       |
//! | [`filter_file`]      | run one document through a pipeline                      |

mod download;
mod materialize;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::{IoError, PipelineError};
use crate::filters::split_tileset;
use crate::pipeline::{BuildContext, Operation, PipelineBuilder, Resolved, Resolver};
use crate::source::{merge_directory_tileset, FileSource};
use crate::tileset::{basename, Tileset};

pub use download::download;
pub use materialize::{materialize, MaterializeReport};

/// Write `data` to `path`, creating parent directories.
pub(crate) async fn write_file(path: &Path, data: &[u8]) -> Result<(), IoError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}

async fn write_tileset(path: &Path, tileset: &Tileset) -> Result<(), PipelineError> {
    write_file(path, &tileset.to_vec()?).await?;
    Ok(())
}

/// Merge the masters of the subdirectories of `dir` into `dir/<master_name>`.
pub async fn merge_directory(
    dir: &Path,
    master_name: &str,
    geometric_error: f64,
) -> Result<PathBuf, PipelineError> {
    let merged = merge_directory_tileset(dir, master_name, geometric_error).await?;
    let path = dir.join(master_name);
    write_tileset(&path, &merged).await?;
    info!(
        path = %path.display(),
        children = merged.root.children.len(),
        "Wrote merged tileset"
    );
    Ok(path)
}

/// Split the document at `source` into `out_dir`.
///
/// The master is written as `<out_dir>/<master_name>`, child documents next
/// to it. Content references are written as found, so `out_dir` is expected
/// to sit where the source's payloads resolve. Returns the number of child
/// documents.
pub async fn split_to_disk(
    source: &Path,
    out_dir: &Path,
    split_count: u32,
    name: &str,
    master_name: &str,
) -> Result<usize, PipelineError> {
    let data = tokio::fs::read(source).await.map_err(IoError::from)?;
    let tileset = Tileset::from_slice(&data)?;
    let output = split_tileset(&tileset, split_count, name)?;

    write_tileset(&out_dir.join(master_name), &output.master).await?;
    for (file_name, document) in &output.documents {
        write_tileset(&out_dir.join(file_name), document).await?;
    }

    info!(
        source = %source.display(),
        out_dir = %out_dir.display(),
        documents = output.documents.len(),
        "Split tileset to disk"
    );
    Ok(output.documents.len())
}

/// Load the document at `source`, run it through `operations` and write the
/// result to `destination`.
///
/// Nested documents and payloads are read relative to the source's
/// directory.
pub async fn filter_file(
    source: &Path,
    destination: &Path,
    operations: &[Operation],
) -> Result<(), PipelineError> {
    let dir = source.parent().unwrap_or_else(|| Path::new("."));
    let target = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PipelineError::NotFound(source.display().to_string()))?;

    let context = BuildContext::new(Arc::new(FileSource::new(dir)));
    let resolver = Resolver::new(Arc::new(PipelineBuilder::new(context)));

    match resolver.resolve_operations(target, operations).await? {
        Resolved::Json(tileset) => write_tileset(destination, &tileset).await?,
        Resolved::Binary(_) => {
            return Err(PipelineError::UnexpectedResource {
                target: basename(target).to_string(),
                message: "only tileset documents can be filtered to a file".to_string(),
            })
        }
    }

    info!(
        source = %source.display(),
        destination = %destination.display(),
        operations = operations.len(),
        "Filtered tileset"
    );
    Ok(())
}

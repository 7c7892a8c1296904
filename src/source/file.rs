use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{strip_query, TileSource};
use crate::error::IoError;

/// Local directory source.
///
/// Identifiers are paths relative to the root directory. Identifiers that
/// would resolve outside the root are reported as not found.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
    identifier: String,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let identifier = root.display().to_string();
        Self { root, identifier }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an identifier to a path under the root.
    pub fn local_path(&self, id: &str) -> Result<PathBuf, IoError> {
        let relative = strip_query(id).trim_start_matches('/');
        let decoded = urlencoding::decode(relative)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| relative.to_string());

        let mut path = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(&decoded).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir if depth > 0 => {
                    path.pop();
                    depth -= 1;
                }
                _ => return Err(IoError::NotFound(id.to_string())),
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl TileSource for FileSource {
    async fn fetch(&self, id: &str) -> Result<Bytes, IoError> {
        let path = self.local_path(id)?;
        debug!(path = %path.display(), "Reading file");

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(IoError::NotFound(id.to_string()))
            }
            Err(e) => Err(IoError::Read(format!("{}: {}", path.display(), e))),
        }
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

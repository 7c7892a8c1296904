use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use super::{strip_query, TileSource};
use crate::error::IoError;

/// Source reading members of a zip archive.
///
/// The central directory is read once when the archive is opened; member
/// extraction runs on the blocking pool.
#[derive(Clone)]
pub struct ArchiveSource {
    archive: Arc<Mutex<ZipArchive<File>>>,
    path: PathBuf,
    identifier: String,
}

impl ArchiveSource {
    /// Open the archive at `path`. Blocking.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IoError> {
        let path = path.into();
        let file = File::open(&path)?;
        let archive = ZipArchive::new(file)
            .map_err(|e| IoError::Archive(format!("{}: {}", path.display(), e)))?;
        let identifier = path.display().to_string();

        Ok(Self {
            archive: Arc::new(Mutex::new(archive)),
            path,
            identifier,
        })
    }

    /// Path of the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_member(&self, name: &str) -> Result<Bytes, IoError> {
        let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut member = match archive.by_name(name) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => return Err(IoError::NotFound(name.to_string())),
            Err(e) => return Err(IoError::Archive(format!("{}: {}", name, e))),
        };

        let mut data = Vec::with_capacity(member.size() as usize);
        member
            .read_to_end(&mut data)
            .map_err(|e| IoError::Archive(format!("{}: {}", name, e)))?;
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl TileSource for ArchiveSource {
    async fn fetch(&self, id: &str) -> Result<Bytes, IoError> {
        let name = strip_query(id).trim_start_matches('/').to_string();
        debug!(archive = %self.identifier, member = %name, "Reading archive member");

        let this = self.clone();
        tokio::task::spawn_blocking(move || this.read_member(&name))
            .await
            .map_err(|e| IoError::Archive(format!("extraction task failed: {}", e)))?
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_archive(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, data) in members {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_reads_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("city.zip");
        write_archive(
            &path,
            &[("tileset.json", b"{}"), ("tiles/0.b3dm", b"payload")],
        );

        let source = ArchiveSource::open(&path).unwrap();
        assert_eq!(&source.fetch("tileset.json").await.unwrap()[..], b"{}");
        assert_eq!(
            &source.fetch("/tiles/0.b3dm?v=1").await.unwrap()[..],
            b"payload"
        );
    }

    #[tokio::test]
    async fn test_missing_member_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("city.zip");
        write_archive(&path, &[("tileset.json", b"{}")]);

        let source = ArchiveSource::open(&path).unwrap();
        let result = source.fetch("missing.b3dm").await;
        assert!(matches!(result, Err(IoError::NotFound(_))));
    }

    #[test]
    fn test_not_an_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.zip");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(
            ArchiveSource::open(&path),
            Err(IoError::Archive(_))
        ));
    }
}

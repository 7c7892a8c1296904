use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{Args, Filter};
use crate::cache::KeyedCache;
use crate::error::PipelineError;
use crate::pipeline::{FilterContext, Resource, Stage, TargetKinds};
use crate::source::{get_bytes, strip_query};
use crate::tileset::{
    basename, dirname, has_scheme, is_tileset_document, join, resolve_content_uri, walk_mut, Node,
    Tileset,
};

/// Absolute payloads kept by the auxiliary fetch cache.
const FETCH_CACHE_CAPACITY: usize = 256;

/// Local names handed out so far.
#[derive(Default)]
struct NameTable {
    /// Local identifier -> original identifier
    forward: HashMap<String, String>,
    /// Original identifier -> local file name
    reverse: HashMap<String, String>,
    next: usize,
}

impl NameTable {
    /// Local file name for `original`, registered under `dir`.
    fn local_name(&mut self, original: &str, dir: &str) -> String {
        let name = match self.reverse.get(original) {
            Some(name) => name.clone(),
            None => {
                let name = format!("{}{}", self.next, extension(original));
                self.next += 1;
                self.reverse.insert(original.to_string(), name.clone());
                name
            }
        };
        self.forward
            .insert(join(dir, &name), original.to_string());
        name
    }
}

/// Extension of the identifier's last segment, dot included.
fn extension(id: &str) -> &str {
    let name = basename(strip_query(id));
    match name.rfind('.') {
        Some(index) if index > 0 => &name[index..],
        _ => "",
    }
}

/// Replaces content URIs with short sequential local names.
///
/// The mapping lives as long as the filter. Requests for a local name are
/// served from the original identifier; absolute URLs are fetched over HTTP
/// through a small cache of their own.
pub struct RelativeFilter {
    names: Mutex<NameTable>,
    fetches: KeyedCache<String, Bytes, PipelineError>,
    http: reqwest::Client,
}

impl RelativeFilter {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            names: Mutex::new(NameTable::default()),
            fetches: KeyedCache::lru(FETCH_CACHE_CAPACITY),
            http,
        }
    }

    pub(crate) fn from_args(args: &Args<'_>, context: &FilterContext<'_>) -> Result<Self, PipelineError> {
        args.at_most(0)?;
        Ok(Self::new(context.build.http.clone()))
    }

    fn names(&self) -> std::sync::MutexGuard<'_, NameTable> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Original identifier behind `target`, if it is a local name.
    fn original(&self, target: &str) -> Option<String> {
        self.names().forward.get(target).cloned()
    }

    async fn fetch_absolute(&self, url: &str) -> Result<Bytes, PipelineError> {
        self.fetches
            .get_or_try_insert(url.to_string(), || async {
                Ok(get_bytes(&self.http, url).await?)
            })
            .await
    }

    /// Rename every content reference of `tileset`, a document stored at
    /// `original` and requested as `target`.
    fn rename_contents(&self, tileset: &mut Tileset, original: &str, target: &str) {
        let source_dir = dirname(original);
        let local_dir = dirname(target);
        let mut names = self.names();
        walk_mut(&mut tileset.root, &mut |node: &mut Node| {
            if let Some(content) = node.content.as_mut() {
                if let Some(uri) = content.target() {
                    let resolved = resolve_content_uri(uri, source_dir);
                    let local = names.local_name(&resolved, local_dir);
                    content.set_target(local);
                }
            }
        });
    }
}

#[async_trait]
impl Filter for RelativeFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Both
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        let original = self.original(target).unwrap_or_else(|| target.to_string());
        if original != target {
            debug!(target, original = %original, "Mapped local name");
        }

        let resource = if has_scheme(&original) {
            Resource::Binary(self.fetch_absolute(&original).await?)
        } else {
            previous.resolve(&original).await?
        };

        if !is_tileset_document(target) {
            return Ok(resource);
        }

        let shared = resource.into_tileset()?;
        let mut tileset = Tileset::clone(&shared);
        self.rename_contents(&mut tileset, &original, target);
        Ok(Resource::Json(Arc::new(tileset)))
    }
}

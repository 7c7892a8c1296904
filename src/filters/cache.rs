use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Args, Filter};
use crate::cache::{namespace_dir, KeyedCache, PersistentCache};
use crate::error::PipelineError;
use crate::pipeline::{FilterContext, Resource, Stage, TargetKinds};
use crate::tileset::{is_tileset_document, Tileset};

enum Backend {
    /// Entry-count LRU or TTL
    Memory(KeyedCache<String, Resource, PipelineError>),
    /// Byte-budgeted files under the upstream signature's namespace
    Persistent(PersistentCache<PipelineError>),
}

/// Memoizes the previous stage.
///
/// `cache:<limit>[:mode]` where mode is `memory` (limit = entries, the
/// default), `ttl` (limit = seconds) or `persistent` (limit = bytes).
pub struct CacheFilter {
    backend: Backend,
}

impl CacheFilter {
    /// In-memory LRU of `entries` resources.
    pub fn memory(entries: usize) -> Self {
        Self {
            backend: Backend::Memory(KeyedCache::lru(entries)),
        }
    }

    /// In-memory cache whose entries expire after `ttl`.
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            backend: Backend::Memory(KeyedCache::ttl(ttl)),
        }
    }

    /// File-backed cache opened on `cache`.
    pub fn persistent(cache: PersistentCache<PipelineError>) -> Self {
        Self {
            backend: Backend::Persistent(cache),
        }
    }

    pub(crate) async fn from_args(
        args: &Args<'_>,
        context: &FilterContext<'_>,
    ) -> Result<Self, PipelineError> {
        args.at_most(2)?;
        let limit: u64 = args.parse_required(0)?;
        if limit == 0 {
            return Err(args.invalid("limit must be positive"));
        }

        match args.raw(1).unwrap_or("memory") {
            "memory" | "false" => Ok(Self::memory(limit as usize)),
            "ttl" => Ok(Self::ttl(Duration::from_secs(limit))),
            "persistent" | "true" => {
                let dir = namespace_dir(&context.build.cache_root, &context.upstream_signature);
                let cache = PersistentCache::open(dir, limit).await?;
                Ok(Self::persistent(cache))
            }
            other => Err(args.invalid(format!(
                "unknown mode '{}' (expected memory, ttl or persistent)",
                other
            ))),
        }
    }
}

#[async_trait]
impl Filter for CacheFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Both
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        match &self.backend {
            Backend::Memory(cache) => {
                cache
                    .get_or_try_insert(target.to_string(), || previous.resolve(target))
                    .await
            }
            Backend::Persistent(cache) => {
                let data = cache
                    .get_or_try_insert(target, || async {
                        previous.resolve(target).await?.into_bytes()
                    })
                    .await?;
                if is_tileset_document(target) {
                    Ok(Resource::Json(Arc::new(Tileset::from_slice(&data)?)))
                } else {
                    Ok(Resource::Binary(data))
                }
            }
        }
    }
}

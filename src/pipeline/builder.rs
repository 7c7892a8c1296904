use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use super::operation::{signature, Operation, SOURCE_OPERATION};
use super::stage::{FilterStage, SourceStage, Stage};
use crate::cache::{CacheStats, KeyedCache};
use crate::error::PipelineError;
use crate::filters::{ConstantHeightModel, ExternalCompressor, FilterKind, HeightModel, MeshCompressor};
use crate::source::TileSource;

/// Default name of a directory's master document.
pub const DEFAULT_MASTER_NAME: &str = "tileset.json";

/// Number of built pipelines kept after a batch eviction.
const DEFAULT_PIPELINE_CACHE_SIZE: usize = 64;

/// Everything a filter factory may need, passed explicitly at build time.
pub struct BuildContext {
    /// Terminal store of every pipeline
    pub source: Arc<dyn TileSource>,
    /// Canonical master document name
    pub master_name: String,
    /// Root directory of persistent caches
    pub cache_root: PathBuf,
    /// Mesh compressor used by `draco`
    pub compressor: Arc<dyn MeshCompressor>,
    /// Height model used by `zshift:auto`
    pub height_model: Arc<dyn HeightModel>,
    /// Client for auxiliary fetches of absolute URLs
    pub http: reqwest::Client,
    /// Collapse unknown filters to their predecessor instead of failing
    pub lenient: bool,
}

impl BuildContext {
    /// Context with default collaborators around `source`.
    pub fn new(source: Arc<dyn TileSource>) -> Self {
        Self {
            source,
            master_name: DEFAULT_MASTER_NAME.to_string(),
            cache_root: std::env::temp_dir().join("tileset-streamer-cache"),
            compressor: Arc::new(ExternalCompressor::default()),
            height_model: Arc::new(ConstantHeightModel::default()),
            http: reqwest::Client::new(),
            lenient: false,
        }
    }

    pub fn with_master_name(mut self, master_name: impl Into<String>) -> Self {
        self.master_name = master_name.into();
        self
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn MeshCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_height_model(mut self, height_model: Arc<dyn HeightModel>) -> Self {
        self.height_model = height_model;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

/// Per-operation view handed to a filter factory.
pub struct FilterContext<'a> {
    pub build: &'a BuildContext,
    /// Signature of the source and every operation before this one
    pub upstream_signature: String,
}

type BuildFuture<'a> = Pin<Box<dyn Future<Output = Result<Arc<dyn Stage>, PipelineError>> + Send + 'a>>;

/// Folds operation lists into stages, memoized by operation list.
///
/// Building `[a, b, c]` builds (or reuses) `[a, b]` and wraps it with `c`, so
/// pipelines sharing a prefix share the prefix's stages and their caches.
pub struct PipelineBuilder {
    context: BuildContext,
    source_stage: Arc<dyn Stage>,
    stages: KeyedCache<Vec<Operation>, Arc<dyn Stage>, PipelineError>,
}

impl PipelineBuilder {
    pub fn new(context: BuildContext) -> Self {
        Self::with_capacity(context, DEFAULT_PIPELINE_CACHE_SIZE)
    }

    pub fn with_capacity(context: BuildContext, capacity: usize) -> Self {
        let source_stage: Arc<dyn Stage> = Arc::new(SourceStage::new(context.source.clone()));
        Self {
            context,
            source_stage,
            stages: KeyedCache::lru(capacity),
        }
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Build statistics (hits are reused pipelines).
    pub fn stats(&self) -> CacheStats {
        self.stages.stats()
    }

    /// Build the stage for `operations`.
    pub fn build<'a>(&'a self, operations: &'a [Operation]) -> BuildFuture<'a> {
        Box::pin(async move {
            let Some((last, prefix)) = operations.split_last() else {
                return Ok(self.source_stage.clone());
            };

            self.stages
                .get_or_try_insert(operations.to_vec(), || async move {
                    let previous = self.build(prefix).await?;
                    self.wrap(last, prefix, previous).await
                })
                .await
        })
    }

    async fn wrap(
        &self,
        operation: &Operation,
        prefix: &[Operation],
        previous: Arc<dyn Stage>,
    ) -> Result<Arc<dyn Stage>, PipelineError> {
        if operation.name == SOURCE_OPERATION {
            return Err(PipelineError::invalid_operation(
                &operation.name,
                "the source is fixed by the server and cannot be selected",
            ));
        }

        let Some(kind) = FilterKind::from_name(&operation.name) else {
            if self.context.lenient {
                warn!(
                    operation = %operation,
                    "Unknown filter, passing through to the previous stage"
                );
                return Ok(previous);
            }
            return Err(PipelineError::invalid_operation(
                &operation.name,
                format!(
                    "unknown filter (expected one of: {})",
                    FilterKind::names().join(", ")
                ),
            ));
        };

        let filter_context = FilterContext {
            build: &self.context,
            upstream_signature: signature(self.context.source.identifier(), prefix),
        };
        let filter = kind.build(&operation.args, &filter_context).await?;

        debug!(operation = %operation, "Built pipeline stage");
        Ok(Arc::new(FilterStage::new(operation.clone(), filter, previous)))
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::operation::Operation;
use crate::error::PipelineError;
use crate::filters::Filter;
use crate::source::TileSource;
use crate::tileset::{is_tileset_document, Tileset};

/// What a stage produces for a target.
#[derive(Debug, Clone)]
pub enum Resource {
    /// A parsed tileset document. Shared; clone the tree before mutating.
    Json(Arc<Tileset>),
    /// An opaque payload.
    Binary(Bytes),
}

impl Resource {
    /// The document, parsing raw bytes if needed.
    pub fn into_tileset(self) -> Result<Arc<Tileset>, PipelineError> {
        match self {
            Resource::Json(tileset) => Ok(tileset),
            Resource::Binary(data) => Ok(Arc::new(Tileset::from_slice(&data)?)),
        }
    }

    /// The raw bytes, serializing a document if needed.
    pub fn into_bytes(self) -> Result<Bytes, PipelineError> {
        match self {
            Resource::Json(tileset) => Ok(Bytes::from(tileset.to_vec()?)),
            Resource::Binary(data) => Ok(data),
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, Resource::Json(_))
    }
}

/// Which target kinds a filter transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKinds {
    /// Tileset documents only
    Json,
    /// Binary payloads only
    Binary,
    /// Every target
    Both,
}

impl TargetKinds {
    /// Whether targets named `target` are transformed.
    pub fn handles(self, target: &str) -> bool {
        match self {
            TargetKinds::Json => is_tileset_document(target),
            TargetKinds::Binary => !is_tileset_document(target),
            TargetKinds::Both => true,
        }
    }
}

/// A built pipeline step: target identifier in, resource out.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn resolve(&self, target: &str) -> Result<Resource, PipelineError>;
}

// =============================================================================
// Terminal stage
// =============================================================================

/// Reads targets from a [`TileSource`], parsing tileset documents.
pub struct SourceStage {
    source: Arc<dyn TileSource>,
}

impl SourceStage {
    pub fn new(source: Arc<dyn TileSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Stage for SourceStage {
    async fn resolve(&self, target: &str) -> Result<Resource, PipelineError> {
        let data = self.source.fetch(target).await?;
        debug!(source = self.source.identifier(), target, bytes = data.len(), "Fetched");

        if is_tileset_document(target) {
            Ok(Resource::Json(Arc::new(Tileset::from_slice(&data)?)))
        } else {
            Ok(Resource::Binary(data))
        }
    }
}

// =============================================================================
// Filter stage
// =============================================================================

/// Wraps a previous stage with one filter.
///
/// Targets of a kind the filter handles go through the filter; everything
/// else goes straight to the previous stage.
pub struct FilterStage {
    operation: Operation,
    filter: Arc<dyn Filter>,
    previous: Arc<dyn Stage>,
}

impl FilterStage {
    pub fn new(operation: Operation, filter: Arc<dyn Filter>, previous: Arc<dyn Stage>) -> Self {
        Self {
            operation,
            filter,
            previous,
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }
}

#[async_trait]
impl Stage for FilterStage {
    async fn resolve(&self, target: &str) -> Result<Resource, PipelineError> {
        if self.filter.kinds().handles(target) {
            self.filter.apply(target, self.previous.as_ref()).await
        } else {
            self.previous.resolve(target).await
        }
    }
}

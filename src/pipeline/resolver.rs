use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::builder::PipelineBuilder;
use super::operation::{parse_pipeline, Operation};
use super::stage::Resource;
use crate::error::PipelineError;
use crate::tileset::{is_tileset_document, Tileset};

/// A resolved target, shaped by the kind of identifier requested.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// Tileset document (the target names a `.json` document)
    Json(Arc<Tileset>),
    /// Opaque payload, possibly empty
    Binary(Bytes),
}

impl Resolved {
    /// Serialized body for transport.
    pub fn into_bytes(self) -> Result<Bytes, PipelineError> {
        match self {
            Resolved::Json(tileset) => Ok(Bytes::from(tileset.to_vec()?)),
            Resolved::Binary(data) => Ok(data),
        }
    }
}

/// Dispatches target identifiers through built pipelines.
pub struct Resolver {
    builder: Arc<PipelineBuilder>,
}

impl Resolver {
    pub fn new(builder: Arc<PipelineBuilder>) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &PipelineBuilder {
        &self.builder
    }

    /// Map the master identifier (empty, or ending in `/`) to the master
    /// document of that directory. Other identifiers are returned as-is.
    pub fn canonical_target(&self, target: &str) -> String {
        let target = target.trim_start_matches('/');
        if target.is_empty() || target.ends_with('/') {
            format!("{}{}", target, self.builder.context().master_name)
        } else {
            target.to_string()
        }
    }

    /// Resolve `target` through the pipeline described by `spec`.
    pub async fn resolve(&self, target: &str, spec: &str) -> Result<Resolved, PipelineError> {
        let operations = parse_pipeline(spec)?;
        self.resolve_operations(target, &operations).await
    }

    /// Resolve `target` through the pipeline built from `operations`.
    pub async fn resolve_operations(
        &self,
        target: &str,
        operations: &[Operation],
    ) -> Result<Resolved, PipelineError> {
        let stage = self.builder.build(operations).await?;
        let target = self.canonical_target(target);
        debug!(target = %target, operations = operations.len(), "Resolving");

        let resource = stage.resolve(&target).await?;
        if is_tileset_document(&target) {
            Ok(Resolved::Json(resource.into_tileset()?))
        } else {
            match resource {
                Resource::Binary(data) => Ok(Resolved::Binary(data)),
                Resource::Json(_) => Err(PipelineError::UnexpectedResource {
                    target,
                    message: "a tileset document was produced for a binary target".to_string(),
                }),
            }
        }
    }
}

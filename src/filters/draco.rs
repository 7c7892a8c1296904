use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Args, Filter};
use crate::cache::SingleFlight;
use crate::error::{IoError, PipelineError};
use crate::pipeline::{FilterContext, Resource, Stage, TargetKinds};
use crate::tileset::{is_b3dm, recombine_b3dm, split_b3dm};

/// Default program used by [`ExternalCompressor`].
pub const DEFAULT_COMPRESSOR_PROGRAM: &str = "gltf-pipeline";

/// Per-channel quantization bit depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizationSettings {
    pub position_bits: u32,
    pub texcoord_bits: u32,
    pub normal_bits: u32,
}

impl QuantizationSettings {
    /// Derive channel depths from a single quantization level.
    ///
    /// Positions get the full depth, texture coordinates two bits less and
    /// normals four bits less, never below one bit.
    pub fn from_level(quantization: u32) -> Self {
        Self {
            position_bits: quantization.max(1),
            texcoord_bits: quantization.saturating_sub(2).max(1),
            normal_bits: quantization.saturating_sub(4).max(1),
        }
    }
}

/// Compresses a glb mesh payload.
#[async_trait]
pub trait MeshCompressor: Send + Sync {
    async fn compress(
        &self,
        glb: Bytes,
        settings: &QuantizationSettings,
    ) -> Result<Bytes, PipelineError>;
}

/// Runs an external glTF command line tool on temporary files.
#[derive(Debug, Clone)]
pub struct ExternalCompressor {
    program: PathBuf,
}

impl ExternalCompressor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ExternalCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSOR_PROGRAM)
    }
}

#[async_trait]
impl MeshCompressor for ExternalCompressor {
    async fn compress(
        &self,
        glb: Bytes,
        settings: &QuantizationSettings,
    ) -> Result<Bytes, PipelineError> {
        let workdir = tempfile::tempdir().map_err(IoError::from)?;
        let input = workdir.path().join("in.glb");
        let output = workdir.path().join("out.glb");
        tokio::fs::write(&input, &glb).await.map_err(IoError::from)?;

        let result = Command::new(&self.program)
            .arg("-i")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .arg("--draco.compressMeshes")
            .arg("--draco.quantizePositionBits")
            .arg(settings.position_bits.to_string())
            .arg("--draco.quantizeTexcoordBits")
            .arg(settings.texcoord_bits.to_string())
            .arg("--draco.quantizeNormalBits")
            .arg(settings.normal_bits.to_string())
            .output()
            .await
            .map_err(|e| {
                PipelineError::UpstreamFailure(format!(
                    "cannot run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !result.status.success() {
            return Err(PipelineError::UpstreamFailure(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        let compressed = tokio::fs::read(&output).await.map_err(IoError::from)?;
        Ok(Bytes::from(compressed))
    }
}

/// Recompresses the mesh of b3dm tiles.
pub struct DracoFilter {
    settings: QuantizationSettings,
    compressor: Arc<dyn MeshCompressor>,
    gate: SingleFlight<String, Bytes, PipelineError>,
}

impl DracoFilter {
    pub fn new(quantization: u32, compressor: Arc<dyn MeshCompressor>) -> Self {
        Self {
            settings: QuantizationSettings::from_level(quantization),
            compressor,
            gate: SingleFlight::new(),
        }
    }

    pub(crate) fn from_args(args: &Args<'_>, context: &FilterContext<'_>) -> Result<Self, PipelineError> {
        args.at_most(1)?;
        let quantization: u32 = args.parse_or(0, 14)?;
        if !(1..=30).contains(&quantization) {
            return Err(args.invalid("quantization must be between 1 and 30 bits"));
        }
        Ok(Self::new(quantization, Arc::clone(&context.build.compressor)))
    }

    async fn recompress(&self, target: &str, data: Bytes) -> Result<Bytes, PipelineError> {
        if !is_b3dm(&data) {
            return Ok(data);
        }

        let (prefix, glb) = split_b3dm(&data)?;
        let original_len = glb.len();
        let compressed = match self.compressor.compress(glb, &self.settings).await {
            Ok(compressed) => compressed,
            Err(e) => {
                warn!(target, error = %e, "Mesh compression failed, serving original tile");
                return Ok(data);
            }
        };

        debug!(
            target,
            before = original_len,
            after = compressed.len(),
            "Recompressed mesh"
        );
        Ok(recombine_b3dm(&prefix, &compressed)?)
    }
}

#[async_trait]
impl Filter for DracoFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Binary
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        let (result, _) = self
            .gate
            .run(target.to_string(), || async {
                let data = previous.resolve(target).await?.into_bytes()?;
                self.recompress(target, data).await
            })
            .await;
        result.map(Resource::Binary)
    }
}

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Args, Filter};
use crate::error::PipelineError;
use crate::pipeline::{Resource, Stage, TargetKinds};

/// Logs every request passing through.
///
/// Level 0 is silent, 1 logs targets at info, 2 adds sizes and timings at
/// debug.
pub struct VerboseFilter {
    level: u8,
}

impl VerboseFilter {
    pub fn new(level: u8) -> Self {
        Self { level }
    }

    pub(crate) fn from_args(args: &Args<'_>) -> Result<Self, PipelineError> {
        args.at_most(1)?;
        let level: u8 = args.parse_or(0, 1)?;
        if level > 2 {
            return Err(args.invalid("verbosity must be 0, 1 or 2"));
        }
        Ok(Self::new(level))
    }
}

#[async_trait]
impl Filter for VerboseFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Both
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        if self.level == 0 {
            return previous.resolve(target).await;
        }

        info!(target, "Request");
        let start = Instant::now();
        let resource = previous.resolve(target).await?;

        if self.level >= 2 {
            match &resource {
                Resource::Json(tileset) => debug!(
                    target,
                    nodes = crate::tileset::nodes(&tileset.root).count(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Resolved document"
                ),
                Resource::Binary(data) => debug!(
                    target,
                    bytes = data.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Resolved payload"
                ),
            }
        }
        Ok(resource)
    }
}

/// Passes every request through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopFilter;

impl NopFilter {
    pub(crate) fn from_args(_args: &Args<'_>) -> Result<Self, PipelineError> {
        Ok(Self)
    }
}

#[async_trait]
impl Filter for NopFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Both
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        previous.resolve(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::{args, grid_tileset};
    use crate::pipeline::testing::MemoryStage;

    #[tokio::test]
    async fn test_pass_through_at_every_level() {
        let stage = MemoryStage::new()
            .with_tileset("tileset.json", grid_tileset(2))
            .with_bytes("0.b3dm", &b"abc"[..]);

        for level in 0..=2 {
            let filter = VerboseFilter::new(level);
            let tileset = filter
                .apply("tileset.json", &stage)
                .await
                .unwrap()
                .into_tileset()
                .unwrap();
            assert_eq!(*tileset, grid_tileset(2));
            let data = filter.apply("0.b3dm", &stage).await.unwrap();
            assert_eq!(&data.into_bytes().unwrap()[..], b"abc");
        }

        let data = NopFilter.apply("0.b3dm", &stage).await.unwrap();
        assert_eq!(&data.into_bytes().unwrap()[..], b"abc");
    }

    #[test]
    fn test_level_argument() {
        let values = args(&["3"]);
        assert!(VerboseFilter::from_args(&Args::new("v", &values)).is_err());
        assert_eq!(VerboseFilter::from_args(&Args::new("v", &[])).unwrap().level, 1);
    }
}

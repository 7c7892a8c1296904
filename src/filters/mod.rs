//! Filter catalog.
//!
//! Every filter is a factory `(args, context) -> Filter`. A built filter is
//! tagged with the target kinds it transforms and receives the previous
//! stage on each call; targets of other kinds never reach it.
//!
//! | Name           | Kinds  | Effect                                              |
//! |----------------|--------|-----------------------------------------------------|
//! | `fetch`        | both   | inline nested tileset documents                     |
//! | `exponential`  | json   | assign geometric errors bottom-up                   |
//! | `growRoot`     | json   | wrap the root in a new, coarser root                |
//! | `quickTree`    | json   | rebuild the hierarchy by median splits              |
//! | `split`        | json   | cut the tree into balanced numbered documents       |
//! | `draco`        | binary | recompress b3dm meshes                              |
//! | `zshift`       | json   | move outermost transforms along the surface normal  |
//! | `relative`     | both   | replace content URIs with short local names         |
//! | `cache`        | both   | memoize the previous stage                          |
//! | `stripVersion` | json   | drop `asset.version`                                |
//! | `v`            | both   | log requests                                        |
//! | `nop`          | both   | pass through                                        |

mod cache;
mod draco;
mod fetch;
mod lod;
mod quick_tree;
mod relative;
mod split;
mod verbose;
mod zshift;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::pipeline::{FilterContext, Resource, Stage, TargetKinds};
use crate::tileset::Tileset;

pub use cache::CacheFilter;
pub use draco::{
    DracoFilter, ExternalCompressor, MeshCompressor, QuantizationSettings,
    DEFAULT_COMPRESSOR_PROGRAM,
};
pub use fetch::FetchFilter;
pub use lod::{ExponentialFilter, GrowRootFilter, StripVersionFilter};
pub use quick_tree::{quick_tree, QuickTreeFilter};
pub use relative::RelativeFilter;
pub use split::{split_tileset, SplitFilter, SplitOutput};
pub use verbose::{NopFilter, VerboseFilter};
pub use zshift::{ConstantHeightModel, HeightModel, ZshiftFilter, DEFAULT_HEIGHT_CORRECTION};

/// A built filter.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Target kinds this filter transforms.
    fn kinds(&self) -> TargetKinds;

    /// Produce `target`, reading whatever it needs from `previous`.
    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError>;
}

/// Closed set of filters that can appear in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Fetch,
    Exponential,
    GrowRoot,
    QuickTree,
    Split,
    Draco,
    Zshift,
    Relative,
    Cache,
    StripVersion,
    Verbose,
    Nop,
}

impl FilterKind {
    /// Every filter, in catalog order.
    pub const ALL: [FilterKind; 12] = [
        FilterKind::Fetch,
        FilterKind::Exponential,
        FilterKind::GrowRoot,
        FilterKind::QuickTree,
        FilterKind::Split,
        FilterKind::Draco,
        FilterKind::Zshift,
        FilterKind::Relative,
        FilterKind::Cache,
        FilterKind::StripVersion,
        FilterKind::Verbose,
        FilterKind::Nop,
    ];

    /// Name used in pipeline specifications.
    pub fn name(self) -> &'static str {
        match self {
            FilterKind::Fetch => "fetch",
            FilterKind::Exponential => "exponential",
            FilterKind::GrowRoot => "growRoot",
            FilterKind::QuickTree => "quickTree",
            FilterKind::Split => "split",
            FilterKind::Draco => "draco",
            FilterKind::Zshift => "zshift",
            FilterKind::Relative => "relative",
            FilterKind::Cache => "cache",
            FilterKind::StripVersion => "stripVersion",
            FilterKind::Verbose => "v",
            FilterKind::Nop => "nop",
        }
    }

    /// Look a filter up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Names of every filter.
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|kind| kind.name()).collect()
    }

    /// Build the filter from raw arguments.
    ///
    /// Unparsable arguments are `InvalidOperation` errors.
    pub async fn build(
        self,
        args: &[String],
        context: &FilterContext<'_>,
    ) -> Result<Arc<dyn Filter>, PipelineError> {
        let args = Args::new(self.name(), args);
        let filter: Arc<dyn Filter> = match self {
            FilterKind::Fetch => Arc::new(FetchFilter::from_args(&args)?),
            FilterKind::Exponential => Arc::new(ExponentialFilter::from_args(&args)?),
            FilterKind::GrowRoot => Arc::new(GrowRootFilter::from_args(&args)?),
            FilterKind::QuickTree => Arc::new(QuickTreeFilter::from_args(&args)?),
            FilterKind::Split => Arc::new(SplitFilter::from_args(&args, context)?),
            FilterKind::Draco => Arc::new(DracoFilter::from_args(&args, context)?),
            FilterKind::Zshift => Arc::new(ZshiftFilter::from_args(&args, context)?),
            FilterKind::Relative => Arc::new(RelativeFilter::from_args(&args, context)?),
            FilterKind::Cache => Arc::new(CacheFilter::from_args(&args, context).await?),
            FilterKind::StripVersion => Arc::new(StripVersionFilter::from_args(&args)?),
            FilterKind::Verbose => Arc::new(VerboseFilter::from_args(&args)?),
            FilterKind::Nop => Arc::new(NopFilter::from_args(&args)?),
        };
        Ok(filter)
    }
}

// =============================================================================
// Argument parsing
// =============================================================================

/// Positional arguments of one operation.
pub(crate) struct Args<'a> {
    name: &'static str,
    values: &'a [String],
}

impl<'a> Args<'a> {
    pub(crate) fn new(name: &'static str, values: &'a [String]) -> Self {
        Self { name, values }
    }

    /// Fail if more than `max` arguments were given.
    pub(crate) fn at_most(&self, max: usize) -> Result<(), PipelineError> {
        if self.values.len() > max {
            return Err(self.invalid(format!(
                "expected at most {} argument(s), got {}",
                max,
                self.values.len()
            )));
        }
        Ok(())
    }

    /// Raw argument at `index`, if present and non-empty.
    pub(crate) fn raw(&self, index: usize) -> Option<&'a str> {
        self.values
            .get(index)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Parse the argument at `index`, using `default` when absent.
    pub(crate) fn parse_or<T: FromStr>(&self, index: usize, default: T) -> Result<T, PipelineError> {
        match self.raw(index) {
            Some(value) => self.parse_value(index, value),
            None => Ok(default),
        }
    }

    /// Parse the required argument at `index`.
    pub(crate) fn parse_required<T: FromStr>(&self, index: usize) -> Result<T, PipelineError> {
        match self.raw(index) {
            Some(value) => self.parse_value(index, value),
            None => Err(self.invalid(format!("missing argument {}", index + 1))),
        }
    }

    /// Parse a finite float at `index`, using `default` when absent.
    pub(crate) fn finite_or(&self, index: usize, default: f64) -> Result<f64, PipelineError> {
        let value = self.parse_or(index, default)?;
        if !value.is_finite() {
            return Err(self.invalid(format!("argument {} must be finite", index + 1)));
        }
        Ok(value)
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::invalid_operation(self.name, reason)
    }

    fn parse_value<T: FromStr>(&self, index: usize, value: &str) -> Result<T, PipelineError> {
        value.parse().map_err(|_| {
            self.invalid(format!(
                "cannot parse argument {} ('{}')",
                index + 1,
                value
            ))
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Resolve `target` from `previous` and hand an owned copy of the document to
/// `transform`.
pub(crate) async fn transform_document<F>(
    target: &str,
    previous: &dyn Stage,
    transform: F,
) -> Result<Resource, PipelineError>
where
    F: FnOnce(&mut Tileset) -> Result<(), PipelineError>,
{
    let shared = previous.resolve(target).await?.into_tileset()?;
    let mut tileset = Tileset::clone(&shared);
    transform(&mut tileset)?;
    Ok(Resource::Json(Arc::new(tileset)))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in FilterKind::ALL {
            assert_eq!(FilterKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(FilterKind::from_name("src"), None);
        assert_eq!(FilterKind::from_name("Fetch"), None);
    }

    #[test]
    fn test_names_are_unique() {
        let mut names = FilterKind::names();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), FilterKind::ALL.len());
    }

    #[tokio::test]
    async fn test_every_filter_builds_with_defaults() {
        let build = context();
        let ctx = filter_context(&build);
        for kind in FilterKind::ALL {
            let args = match kind {
                FilterKind::GrowRoot => args(&["500"]),
                FilterKind::Zshift => args(&["10"]),
                FilterKind::Cache => args(&["10"]),
                _ => Vec::new(),
            };
            assert!(
                kind.build(&args, &ctx).await.is_ok(),
                "{} failed to build",
                kind.name()
            );
        }
    }

    #[test]
    fn test_args_parsing() {
        let values = args(&["3", "", "x"]);
        let parsed = Args::new("quickTree", &values);
        assert_eq!(parsed.parse_or::<u32>(0, 1).unwrap(), 3);
        assert_eq!(parsed.parse_or::<u32>(1, 7).unwrap(), 7);
        assert!(parsed.parse_or::<u32>(2, 7).is_err());
        assert!(parsed.parse_required::<u32>(5).is_err());
        assert!(parsed.at_most(2).is_err());
        assert!(parsed.at_most(3).is_ok());
    }
}

//! Level-of-detail filters: geometric error assignment and root growth.

use async_trait::async_trait;

use super::{transform_document, Args, Filter};
use crate::error::{PipelineError, TilesetError};
use crate::pipeline::{Resource, Stage, TargetKinds};
use crate::tileset::{is_tileset_document, Node, Refine, Tileset};

// =============================================================================
// exponential
// =============================================================================

/// Assigns geometric errors bottom-up.
///
/// Leaves get `base`, leaves still pointing at a nested tileset get
/// `json_leaf`, and every inner node gets
/// `factor * max(base, max(children))`. With `factor >= 1` every node's
/// error is at least its children's.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialFilter {
    base: f64,
    factor: f64,
    json_leaf: f64,
}

impl ExponentialFilter {
    pub fn new(base: f64, factor: f64, json_leaf: f64) -> Result<Self, TilesetError> {
        if base < 0.0 || json_leaf < 0.0 {
            return Err(TilesetError::InvalidArgument(
                "geometric errors must be non-negative".to_string(),
            ));
        }
        if factor < 1.0 {
            return Err(TilesetError::InvalidArgument(format!(
                "factor {} would make parents finer than their children",
                factor
            )));
        }
        Ok(Self {
            base,
            factor,
            json_leaf,
        })
    }

    pub(crate) fn from_args(args: &Args<'_>) -> Result<Self, PipelineError> {
        args.at_most(3)?;
        let base = args.finite_or(0, 1.0)?;
        let factor = args.finite_or(1, 2.0)?;
        let json_leaf = args.finite_or(2, base)?;
        Self::new(base, factor, json_leaf).map_err(|e| args.invalid(e.to_string()))
    }

    /// Assign errors to the whole document.
    pub fn assign(&self, tileset: &mut Tileset) {
        let root_error = self.assign_node(&mut tileset.root);
        tileset.geometric_error = root_error;
    }

    fn assign_node(&self, node: &mut Node) -> f64 {
        let error = if node.is_leaf() {
            match node.content_uri() {
                Some(uri) if is_tileset_document(uri) => self.json_leaf,
                _ => self.base,
            }
        } else {
            let max_child = node
                .children
                .iter_mut()
                .map(|child| self.assign_node(child))
                .fold(f64::NEG_INFINITY, f64::max);
            self.factor * self.base.max(max_child)
        };
        node.geometric_error = error;
        error
    }
}

#[async_trait]
impl Filter for ExponentialFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Json
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        transform_document(target, previous, |tileset| {
            self.assign(tileset);
            Ok(())
        })
        .await
    }
}

// =============================================================================
// growRoot
// =============================================================================

/// Wraps the root as the sole child of a new, coarser root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowRootFilter {
    geometric_error: f64,
}

impl GrowRootFilter {
    pub fn new(geometric_error: f64) -> Self {
        Self { geometric_error }
    }

    pub(crate) fn from_args(args: &Args<'_>) -> Result<Self, PipelineError> {
        args.at_most(1)?;
        let geometric_error: f64 = args.parse_required(0)?;
        if !geometric_error.is_finite() || geometric_error < 0.0 {
            return Err(args.invalid("geometric error must be finite and non-negative"));
        }
        Ok(Self::new(geometric_error))
    }

    /// Grow the document's root.
    ///
    /// A new error below the current root's would invert the error order and
    /// is rejected.
    pub fn grow(&self, tileset: &mut Tileset) -> Result<(), TilesetError> {
        if self.geometric_error < tileset.root.geometric_error {
            return Err(TilesetError::StructuralViolation(format!(
                "new root error {} is below the current root error {}",
                self.geometric_error, tileset.root.geometric_error
            )));
        }

        let bounding_volume = tileset.root.bounding_volume.clone();
        let old_root = std::mem::replace(&mut tileset.root, Node::new([0.0; 6], 0.0));

        let mut root = Node::new([0.0; 6], self.geometric_error);
        root.bounding_volume = bounding_volume;
        root.refine = Some(Refine::Add);
        root.children = vec![old_root];

        tileset.root = root;
        tileset.geometric_error = self.geometric_error;
        Ok(())
    }
}

#[async_trait]
impl Filter for GrowRootFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Json
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        transform_document(target, previous, |tileset| Ok(self.grow(tileset)?)).await
    }
}

// =============================================================================
// stripVersion
// =============================================================================

/// Removes `asset.version`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripVersionFilter;

impl StripVersionFilter {
    pub(crate) fn from_args(args: &Args<'_>) -> Result<Self, PipelineError> {
        args.at_most(0)?;
        Ok(Self)
    }
}

#[async_trait]
impl Filter for StripVersionFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Json
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        transform_document(target, previous, |tileset| {
            tileset.asset.version = None;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::{args, grid_tileset};
    use crate::pipeline::testing::MemoryStage;
    use crate::tileset::nodes;

    fn assert_errors_monotonic(node: &Node) {
        for child in &node.children {
            assert!(
                node.geometric_error >= child.geometric_error,
                "parent {} < child {}",
                node.geometric_error,
                child.geometric_error
            );
            assert_errors_monotonic(child);
        }
    }

    fn single_leaf_tileset() -> Tileset {
        let region = [0.1, 0.2, 0.3, 0.4, 0.0, 50.0];
        Tileset::new(Node::inner(
            region,
            0.0,
            vec![Node::leaf(region, 0.0, "0.b3dm")],
        ))
    }

    #[test]
    fn test_exponential_formula() {
        let mut tileset = grid_tileset(4);
        tileset.root.children[3] = Node::inner(
            tileset.root.children[3].region().unwrap(),
            0.0,
            vec![Node::leaf(tileset.root.children[3].region().unwrap(), 0.0, "n/tileset.json")],
        );

        ExponentialFilter::new(1.0, 2.0, 160.0)
            .unwrap()
            .assign(&mut tileset);

        assert_eq!(tileset.root.children[0].geometric_error, 1.0);
        assert_eq!(tileset.root.children[3].children[0].geometric_error, 160.0);
        assert_eq!(tileset.root.children[3].geometric_error, 320.0);
        assert_eq!(tileset.root.geometric_error, 640.0);
        assert_eq!(tileset.geometric_error, 640.0);
        assert_errors_monotonic(&tileset.root);
    }

    #[test]
    fn test_exponential_is_monotonic_on_deep_trees() {
        let mut tileset = crate::filters::quick_tree(&grid_tileset(50), 1).unwrap();
        ExponentialFilter::new(0.5, 1.5, 3.0)
            .unwrap()
            .assign(&mut tileset);
        assert_errors_monotonic(&tileset.root);
    }

    #[test]
    fn test_exponential_rejects_shrinking_factor() {
        let values = args(&["1", "0.5"]);
        assert!(matches!(
            ExponentialFilter::from_args(&Args::new("exponential", &values)),
            Err(PipelineError::InvalidOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_exponential_then_grow_root() {
        let original = single_leaf_tileset();
        let original_region = original.root.region().unwrap();
        let stage = MemoryStage::new().with_tileset("tileset.json", original);

        let exponential = ExponentialFilter::new(1.0, 2.0, 160.0).unwrap();
        let lod = exponential
            .apply("tileset.json", &stage)
            .await
            .unwrap()
            .into_tileset()
            .unwrap();

        let stage = MemoryStage::new().with_tileset("tileset.json", (*lod).clone());
        let grown = GrowRootFilter::new(500.0)
            .apply("tileset.json", &stage)
            .await
            .unwrap()
            .into_tileset()
            .unwrap();

        assert_eq!(grown.geometric_error, 500.0);
        assert_eq!(grown.root.geometric_error, 500.0);
        assert_eq!(grown.root.refine, Some(Refine::Add));
        assert_eq!(grown.root.region().unwrap(), original_region);
        assert_eq!(grown.root.children.len(), 1);

        let old_root = &grown.root.children[0];
        assert_eq!(old_root.region().unwrap(), original_region);
        assert_eq!(old_root.geometric_error, 2.0);
        assert_eq!(old_root.children[0].geometric_error, 1.0);
    }

    #[test]
    fn test_grow_root_rejects_smaller_error() {
        let mut tileset = single_leaf_tileset();
        tileset.root.geometric_error = 1000.0;
        let result = GrowRootFilter::new(500.0).grow(&mut tileset);
        assert!(matches!(result, Err(TilesetError::StructuralViolation(_))));
    }

    #[tokio::test]
    async fn test_filters_do_not_mutate_upstream_tree() {
        let stage = MemoryStage::new().with_tileset("tileset.json", single_leaf_tileset());
        StripVersionFilter
            .apply("tileset.json", &stage)
            .await
            .unwrap();
        let upstream = stage
            .resolve("tileset.json")
            .await
            .unwrap()
            .into_tileset()
            .unwrap();
        assert_eq!(upstream.asset.version.as_deref(), Some("1.0"));
    }

    #[tokio::test]
    async fn test_strip_version() {
        let stage = MemoryStage::new().with_tileset("tileset.json", single_leaf_tileset());
        let stripped = StripVersionFilter
            .apply("tileset.json", &stage)
            .await
            .unwrap()
            .into_tileset()
            .unwrap();
        assert!(stripped.asset.version.is_none());
        assert_eq!(nodes(&stripped.root).count(), 2);
    }
}

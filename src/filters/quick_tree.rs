use async_trait::async_trait;
use tracing::debug;

use super::{transform_document, Args, Filter};
use crate::error::{PipelineError, TilesetError};
use crate::pipeline::{Resource, Stage, TargetKinds};
use crate::tileset::{bounding_region, childless, Node, Region, Tileset};

/// Largest accepted `compressLevels`; 2^16 children per node is already
/// far beyond anything a viewer traverses.
const MAX_COMPRESS_LEVELS: u32 = 16;

/// Rebuilds the hierarchy from the leaf set by recursive median splits.
pub struct QuickTreeFilter {
    compress_levels: u32,
}

impl QuickTreeFilter {
    pub fn new(compress_levels: u32) -> Self {
        Self { compress_levels }
    }

    pub(crate) fn from_args(args: &Args<'_>) -> Result<Self, PipelineError> {
        args.at_most(1)?;
        let levels: u32 = args.parse_or(0, 3)?;
        if levels == 0 || levels > MAX_COMPRESS_LEVELS {
            return Err(args.invalid(format!(
                "compressLevels must be between 1 and {}",
                MAX_COMPRESS_LEVELS
            )));
        }
        Ok(Self::new(levels))
    }
}

#[async_trait]
impl Filter for QuickTreeFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Json
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        transform_document(target, previous, |tileset| {
            *tileset = quick_tree(tileset, self.compress_levels)?;
            Ok(())
        })
        .await
    }
}

/// Rebuild `tileset` from its leaves.
///
/// Each emitted level collapses `compress_levels` binary splits, so inner
/// nodes have at most `2^compress_levels` children. Inner nodes get the union
/// region of their children, `refine=ADD` and the largest child error as a
/// provisional error. A tree whose root is its only leaf is returned as-is.
pub fn quick_tree(tileset: &Tileset, compress_levels: u32) -> Result<Tileset, TilesetError> {
    if compress_levels == 0 {
        return Err(TilesetError::InvalidArgument(
            "compressLevels must be at least 1".to_string(),
        ));
    }
    if tileset.root.is_leaf() {
        return Ok(tileset.clone());
    }

    let leaves = childless(&tileset.root)
        .into_iter()
        .map(|leaf| Ok((leaf.region()?, leaf.clone())))
        .collect::<Result<Vec<(Region, Node)>, TilesetError>>()?;
    let count = leaves.len();

    let mut root = build_level(leaves, compress_levels)?;
    root.transform = tileset.root.transform;
    debug!(leaves = count, compress_levels, "Rebuilt tree");

    let mut rebuilt = tileset.clone();
    rebuilt.geometric_error = root.geometric_error;
    rebuilt.root = root;
    Ok(rebuilt)
}

fn build_level(mut items: Vec<(Region, Node)>, levels: u32) -> Result<Node, TilesetError> {
    if items.len() == 1 {
        if let Some((_, node)) = items.pop() {
            return Ok(node);
        }
    }

    let mut groups = vec![items];
    for _ in 0..levels {
        groups = groups
            .into_iter()
            .flat_map(|group| {
                if group.len() > 1 {
                    let (low, high) = median_split(group);
                    vec![low, high]
                } else {
                    vec![group]
                }
            })
            .collect();
    }

    let mut children = Vec::with_capacity(groups.len());
    let mut regions = Vec::with_capacity(groups.len());
    for group in groups {
        let child = build_level(group, levels)?;
        regions.push(child.region()?);
        children.push(child);
    }

    let error = children
        .iter()
        .map(|child| child.geometric_error)
        .fold(0.0, f64::max);
    Ok(Node::inner(bounding_region(regions)?, error, children))
}

/// Cut `items` at the count median along the axis of larger extent.
fn median_split(mut items: Vec<(Region, Node)>) -> (Vec<(Region, Node)>, Vec<(Region, Node)>) {
    let (mut west, mut south) = (f64::INFINITY, f64::INFINITY);
    let (mut east, mut north) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (region, _) in &items {
        west = west.min(region[0]);
        south = south.min(region[1]);
        east = east.max(region[2]);
        north = north.max(region[3]);
    }

    // 0: east-west, 1: north-south
    let axis = if east - west >= north - south { 0 } else { 1 };
    let center = |region: &Region| (region[axis] + region[axis + 2]) / 2.0;
    items.sort_by(|(a, _), (b, _)| center(a).total_cmp(&center(b)));

    let high = items.split_off(items.len() / 2);
    (items, high)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::{args, grid_tileset};
    use crate::tileset::{nodes, region_contains};

    fn sorted_uris(root: &Node) -> Vec<String> {
        let mut uris: Vec<String> = childless(root)
            .into_iter()
            .filter_map(|n| n.content_uri().map(str::to_string))
            .collect();
        uris.sort();
        uris
    }

    fn assert_contains_descendants(node: &Node) {
        let outer = node.region().unwrap();
        for child in &node.children {
            assert!(region_contains(&outer, &child.region().unwrap()));
            assert_contains_descendants(child);
        }
    }

    #[test]
    fn test_leaf_set_is_preserved() {
        let original = grid_tileset(73);
        let rebuilt = quick_tree(&original, 3).unwrap();
        assert_eq!(sorted_uris(&rebuilt.root), sorted_uris(&original.root));
        assert_eq!(childless(&rebuilt.root).len(), 73);
    }

    #[test]
    fn test_regions_contain_descendants() {
        let rebuilt = quick_tree(&grid_tileset(100), 2).unwrap();
        assert_contains_descendants(&rebuilt.root);
    }

    #[test]
    fn test_branching_factor_bounded() {
        for levels in 1..=3 {
            let rebuilt = quick_tree(&grid_tileset(64), levels).unwrap();
            let max_children = nodes(&rebuilt.root)
                .map(|n| n.children.len())
                .max()
                .unwrap();
            assert!(max_children <= 1 << levels);
        }
    }

    #[test]
    fn test_one_level_per_compressed_split() {
        // 64 leaves with 8-way branching need exactly two inner levels.
        let rebuilt = quick_tree(&grid_tileset(64), 3).unwrap();
        assert_eq!(rebuilt.root.children.len(), 8);
        assert!(rebuilt.root.children.iter().all(|c| c.children.len() == 8));
        assert!(rebuilt.root.children[0].children[0].is_leaf());
    }

    #[test]
    fn test_inner_nodes_are_additive() {
        let rebuilt = quick_tree(&grid_tileset(20), 1).unwrap();
        for node in nodes(&rebuilt.root).filter(|n| !n.is_leaf()) {
            assert_eq!(node.refine, Some(crate::tileset::Refine::Add));
        }
    }

    #[test]
    fn test_single_leaf_root_unchanged() {
        let tileset = Tileset::new(Node::leaf([0.0, 0.0, 1.0, 1.0, 0.0, 1.0], 3.0, "a.b3dm"));
        assert_eq!(quick_tree(&tileset, 3).unwrap(), tileset);
    }

    #[test]
    fn test_root_transform_carried_over() {
        let mut tileset = grid_tileset(5);
        let mut transform = [0.0; 16];
        transform[12] = 7.0;
        tileset.root.transform = Some(transform);
        let rebuilt = quick_tree(&tileset, 1).unwrap();
        assert_eq!(rebuilt.root.transform, Some(transform));
    }

    #[test]
    fn test_leaf_without_region_is_structural() {
        let mut tileset = grid_tileset(3);
        tileset.root.children[1].bounding_volume.region = None;
        assert!(matches!(
            quick_tree(&tileset, 1),
            Err(TilesetError::StructuralViolation(_))
        ));
    }

    #[test]
    fn test_compress_levels_argument() {
        let values = args(&["0"]);
        assert!(QuickTreeFilter::from_args(&Args::new("quickTree", &values)).is_err());
        let values = args(&["x"]);
        assert!(QuickTreeFilter::from_args(&Args::new("quickTree", &values)).is_err());
        let values = args(&["2"]);
        assert_eq!(
            QuickTreeFilter::from_args(&Args::new("quickTree", &values))
                .unwrap()
                .compress_levels,
            2
        );
    }
}

use std::sync::Arc;

use async_trait::async_trait;

use super::{transform_document, Args, Filter};
use crate::error::{PipelineError, TilesetError};
use crate::pipeline::{FilterContext, Resource, Stage, TargetKinds};
use crate::tileset::{Node, Tileset};

/// Default height correction of [`ConstantHeightModel`], in meters.
pub const DEFAULT_HEIGHT_CORRECTION: f64 = 47.0;

/// Regional height correction used by `zshift:auto`.
pub trait HeightModel: Send + Sync {
    /// Correction in meters at a position given in radians.
    fn height(&self, longitude: f64, latitude: f64) -> f64;
}

/// The same correction everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantHeightModel(pub f64);

impl Default for ConstantHeightModel {
    fn default() -> Self {
        Self(DEFAULT_HEIGHT_CORRECTION)
    }
}

impl HeightModel for ConstantHeightModel {
    fn height(&self, _longitude: f64, _latitude: f64) -> f64 {
        self.0
    }
}

#[derive(Clone)]
enum Shift {
    Fixed(f64),
    Auto(Arc<dyn HeightModel>),
}

/// Moves outermost transforms along the outward surface normal.
pub struct ZshiftFilter {
    shift: Shift,
}

impl ZshiftFilter {
    /// Shift every outermost transform by `offset` meters.
    pub fn fixed(offset: f64) -> Self {
        Self {
            shift: Shift::Fixed(offset),
        }
    }

    /// Shift by the negated height model at each node's center.
    pub fn auto(model: Arc<dyn HeightModel>) -> Self {
        Self {
            shift: Shift::Auto(model),
        }
    }

    pub(crate) fn from_args(args: &Args<'_>, context: &FilterContext<'_>) -> Result<Self, PipelineError> {
        args.at_most(1)?;
        match args.raw(0) {
            Some("auto") => Ok(Self::auto(Arc::clone(&context.build.height_model))),
            Some(_) => {
                let offset: f64 = args.parse_required(0)?;
                if !offset.is_finite() {
                    return Err(args.invalid("offset must be finite"));
                }
                Ok(Self::fixed(offset))
            }
            None => Err(args.invalid("expected an offset in meters or 'auto'")),
        }
    }

    /// Shift the document in place.
    pub fn shift(&self, tileset: &mut Tileset) -> Result<(), TilesetError> {
        self.shift_node(&mut tileset.root)
    }

    fn shift_node(&self, node: &mut Node) -> Result<(), TilesetError> {
        if node.transform.is_none() {
            for child in &mut node.children {
                self.shift_node(child)?;
            }
            return Ok(());
        }

        let region = node.region()?;
        let longitude = (region[0] + region[2]) / 2.0;
        let latitude = (region[1] + region[3]) / 2.0;
        let offset = match &self.shift {
            Shift::Fixed(offset) => *offset,
            Shift::Auto(model) => -model.height(longitude, latitude),
        };

        let normal = [
            latitude.cos() * longitude.cos(),
            latitude.cos() * longitude.sin(),
            latitude.sin(),
        ];
        if let Some(transform) = node.transform.as_mut() {
            for (axis, component) in normal.iter().enumerate() {
                transform[12 + axis] += component * offset;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Filter for ZshiftFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Json
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        transform_document(target, previous, |tileset| Ok(self.shift(tileset)?)).await
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::*;
    use crate::filters::test_support::{args, context, filter_context};

    fn identity_with_translation(translation: [f64; 3]) -> [f64; 16] {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        m[12..15].copy_from_slice(&translation);
        m
    }

    fn transformed_leaf(region: [f64; 6]) -> Node {
        let mut node = Node::leaf(region, 0.0, "a.b3dm");
        node.transform = Some(identity_with_translation([1.0, 2.0, 3.0]));
        node
    }

    #[test]
    fn test_shift_at_origin_moves_along_x() {
        let mut tileset = Tileset::new(transformed_leaf([-0.1, -0.1, 0.1, 0.1, 0.0, 1.0]));
        ZshiftFilter::fixed(10.0).shift(&mut tileset).unwrap();

        let m = tileset.root.transform.unwrap();
        assert!((m[12] - 11.0).abs() < 1e-9);
        assert!((m[13] - 2.0).abs() < 1e-9);
        assert!((m[14] - 3.0).abs() < 1e-9);
        assert_eq!(m[0], 1.0);
    }

    #[test]
    fn test_shift_at_pole_moves_along_z() {
        let mut tileset = Tileset::new(transformed_leaf([0.0, FRAC_PI_2, 0.0, FRAC_PI_2, 0.0, 1.0]));
        ZshiftFilter::fixed(-5.0).shift(&mut tileset).unwrap();

        let m = tileset.root.transform.unwrap();
        assert!((m[12] - 1.0).abs() < 1e-9);
        assert!((m[14] + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_only_outermost_transforms_shift() {
        let region = [-0.1, -0.1, 0.1, 0.1, 0.0, 1.0];
        let mut outer = transformed_leaf(region);
        outer.children.push(transformed_leaf(region));
        let mut tileset = Tileset::new(Node::inner(region, 1.0, vec![outer]));

        ZshiftFilter::fixed(10.0).shift(&mut tileset).unwrap();

        let outer = &tileset.root.children[0];
        assert!((outer.transform.unwrap()[12] - 11.0).abs() < 1e-9);
        assert_eq!(outer.children[0].transform.unwrap()[12], 1.0);
        assert!(tileset.root.transform.is_none());
    }

    #[test]
    fn test_auto_negates_height_model() {
        let mut tileset = Tileset::new(transformed_leaf([-0.1, -0.1, 0.1, 0.1, 0.0, 1.0]));
        ZshiftFilter::auto(Arc::new(ConstantHeightModel(47.0)))
            .shift(&mut tileset)
            .unwrap();
        assert!((tileset.root.transform.unwrap()[12] + 46.0).abs() < 1e-9);
    }

    #[test]
    fn test_arguments() {
        let build = context();
        let ctx = filter_context(&build);

        let values = args(&["auto"]);
        let filter = ZshiftFilter::from_args(&Args::new("zshift", &values), &ctx).unwrap();
        assert!(matches!(filter.shift, Shift::Auto(_)));

        let values = args(&["-12.5"]);
        let filter = ZshiftFilter::from_args(&Args::new("zshift", &values), &ctx).unwrap();
        assert!(matches!(filter.shift, Shift::Fixed(offset) if offset == -12.5));

        assert!(ZshiftFilter::from_args(&Args::new("zshift", &[]), &ctx).is_err());
        let values = args(&["up"]);
        assert!(ZshiftFilter::from_args(&Args::new("zshift", &values), &ctx).is_err());
    }
}

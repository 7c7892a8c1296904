//! Serde model of a tileset document.
//!
//! Only the properties the filters reason about are typed. Everything else
//! (extensions, metadata, `extras`, viewer request volumes, ...) is kept in
//! the `extra` maps so a document survives a parse/serialize cycle intact.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TilesetError;

/// Geographic region: `[west, south, east, north, min_height, max_height]`.
///
/// Longitude and latitude are in radians, heights in meters.
pub type Region = [f64; 6];

/// Refinement strategy for child tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Refine {
    /// Children supplement the parent
    Add,
    /// Children replace the parent
    Replace,
}

/// Asset metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Format version (e.g. "1.0")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Bounding volume of a node. Only `region` is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BoundingVolume {
    /// A bounding volume holding just a region.
    pub fn from_region(region: Region) -> Self {
        Self {
            region: Some(region),
            extra: Map::new(),
        }
    }
}

/// Content reference of a node.
///
/// Older documents use `url`, newer ones `uri`. Whichever key was read is
/// the one written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Content {
    /// Content pointing at `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            url: None,
            extra: Map::new(),
        }
    }

    /// The referenced URI, if any.
    pub fn target(&self) -> Option<&str> {
        self.uri.as_deref().or(self.url.as_deref())
    }

    /// Replace the referenced URI, keeping the key that was used.
    pub fn set_target(&mut self, target: impl Into<String>) {
        if self.uri.is_none() && self.url.is_some() {
            self.url = Some(target.into());
        } else {
            self.uri = Some(target.into());
        }
    }
}

/// A single tile of the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "boundingVolume")]
    pub bounding_volume: BoundingVolume,

    #[serde(rename = "geometricError", default)]
    pub geometric_error: f64,

    /// Optional 4x4 column-major transform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<[f64; 16]>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refine: Option<Refine>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    /// A childless node with the given region and error.
    pub fn new(region: Region, geometric_error: f64) -> Self {
        Self {
            bounding_volume: BoundingVolume::from_region(region),
            geometric_error,
            transform: None,
            refine: None,
            children: Vec::new(),
            content: None,
            extra: Map::new(),
        }
    }

    /// A leaf pointing at `uri`.
    pub fn leaf(region: Region, geometric_error: f64, uri: impl Into<String>) -> Self {
        Self {
            content: Some(Content::new(uri)),
            ..Self::new(region, geometric_error)
        }
    }

    /// An inner node with `refine=ADD` over the given children.
    pub fn inner(region: Region, geometric_error: f64, children: Vec<Node>) -> Self {
        Self {
            refine: Some(Refine::Add),
            children,
            ..Self::new(region, geometric_error)
        }
    }

    /// The node's bounding region.
    ///
    /// Nodes bounded by a box or sphere cannot take part in region
    /// arithmetic and are reported as a structural violation.
    pub fn region(&self) -> Result<Region, TilesetError> {
        self.bounding_volume.region.ok_or_else(|| {
            TilesetError::StructuralViolation(
                "node has no bounding region (box and sphere volumes are not supported)"
                    .to_string(),
            )
        })
    }

    /// The content URI, if any.
    pub fn content_uri(&self) -> Option<&str> {
        self.content.as_ref().and_then(Content::target)
    }

    /// Whether the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A tileset document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tileset {
    #[serde(default)]
    pub asset: Asset,

    #[serde(rename = "geometricError", default)]
    pub geometric_error: f64,

    pub root: Node,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tileset {
    /// A version 1.0 tileset around `root`, mirroring its error.
    pub fn new(root: Node) -> Self {
        Self {
            asset: Asset {
                version: Some("1.0".to_string()),
                extra: Map::new(),
            },
            geometric_error: root.geometric_error,
            root,
            extra: Map::new(),
        }
    }

    /// Parse a document from raw bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, TilesetError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Serialize the document.
    pub fn to_vec(&self) -> Result<Vec<u8>, TilesetError> {
        Ok(serde_json::to_vec(self)?)
    }
}

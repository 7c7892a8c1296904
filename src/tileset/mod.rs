//! Tileset documents and the primitives the filters are built on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                Filters                  │
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┼───────────┐
//!          ▼           ▼           ▼
//! ┌─────────────┐ ┌──────────┐ ┌──────────┐
//! │    model    │ │   tree   │ │   b3dm   │
//! │ (serde doc) │ │ (walks,  │ │ (header  │
//! │             │ │  regions,│ │  codec)  │
//! │             │ │  URIs)   │ │          │
//! └─────────────┘ └──────────┘ └──────────┘
//! ```

pub mod b3dm;
mod model;
pub mod tree;

pub use b3dm::{is_b3dm, recombine_b3dm, split_b3dm, B3dmHeader, B3DM_HEADER_LEN, B3DM_MAGIC};
pub use model::{Asset, BoundingVolume, Content, Node, Refine, Region, Tileset};
pub use tree::{
    basename, bounding_region, childless, count_leaves, dirname, has_scheme, is_tileset_document,
    join, leaves, nodes, nodes_region, rebase_content, region_contains, relative_uri,
    resolve_content_uri, walk_mut, Nodes,
};

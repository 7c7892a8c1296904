//! Pipeline construction and request resolution.
//!
//! # Architecture
//!
//! ```text
//! GET city/tileset.json?fetch&exponential:1:2:160
//!                │
//!                ▼
//!        ┌───────────────┐   parse    ┌──────────────────────┐
//!        │   Resolver    │──────────▶│  [fetch, exponential] │
//!        └───────┬───────┘            └──────────┬───────────┘
//!                │                               │ build (memoized)
//!                ▼                               ▼
//!        ┌──────────────────────────────────────────────────┐
//!        │ FilterStage(exponential)                         │
//!        │   └─▶ FilterStage(fetch)                         │
//!        │         └─▶ SourceStage ──▶ TileSource           │
//!        └──────────────────────────────────────────────────┘
//! ```
//!
//! Each filter stage either transforms a target (when the filter handles its
//! kind) or forwards it to the previous stage unchanged.

mod builder;
mod operation;
mod resolver;
mod stage;

pub use builder::{BuildContext, FilterContext, PipelineBuilder, DEFAULT_MASTER_NAME};
pub use operation::{parse_pipeline, signature, Operation, SOURCE_OPERATION};
pub use resolver::{Resolved, Resolver};
pub use stage::{FilterStage, Resource, SourceStage, Stage, TargetKinds};

#[cfg(test)]
pub(crate) use stage::testing;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Args, Filter};
use crate::error::{PipelineError, TilesetError};
use crate::pipeline::{Resource, Stage, TargetKinds};
use crate::tileset::{dirname, is_tileset_document, relative_uri, resolve_content_uri, Node, Tileset};

type ExpandFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'a>>;

/// Inlines nested tileset documents into the requested document.
///
/// Nodes are visited in pre-order, children in document order. When a
/// node's content is another tileset document, that document is loaded
/// through the previous stage, expanded itself, and its root appended as an
/// extra child; the content reference is dropped. The expansion budget is
/// charged depth-first, so a nested document spends its share before the
/// expanding node's later siblings.
///
/// Payload references inside expanded documents are rewritten relative to
/// the directory of the requested document, so the flattened tree stays
/// resolvable from where it is served.
///
/// A document that references itself or one of the documents it is nested
/// in is a structural violation. The same document reached along two
/// separate branches is expanded twice.
pub struct FetchFilter {
    /// Maximum number of expansions, `None` for unlimited
    limit: Option<usize>,
}

impl FetchFilter {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit }
    }

    pub(crate) fn from_args(args: &Args<'_>) -> Result<Self, PipelineError> {
        args.at_most(1)?;
        let limit: i64 = args.parse_or(0, -1)?;
        let limit = match limit {
            -1 => None,
            n if n >= 0 => Some(n as usize),
            _ => return Err(args.invalid("limit must be -1 (unlimited) or non-negative")),
        };
        Ok(Self::new(limit))
    }

    /// Expand `tileset`, whose own location is `target`.
    pub async fn expand(
        &self,
        tileset: &mut Tileset,
        target: &str,
        previous: &dyn Stage,
    ) -> Result<usize, PipelineError> {
        let root_dir = dirname(target);
        let mut budget = Budget {
            remaining: self.limit,
            used: 0,
        };
        let mut chain = vec![resolve_content_uri(target, "")];
        expand_node(
            &mut tileset.root,
            root_dir,
            root_dir,
            previous,
            &mut budget,
            &mut chain,
        )
        .await?;
        Ok(budget.used)
    }
}

struct Budget {
    remaining: Option<usize>,
    used: usize,
}

impl Budget {
    fn take(&mut self) -> bool {
        match &mut self.remaining {
            None => {
                self.used += 1;
                true
            }
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                self.used += 1;
                true
            }
        }
    }
}

fn expand_node<'a>(
    node: &'a mut Node,
    current_dir: &'a str,
    root_dir: &'a str,
    previous: &'a dyn Stage,
    budget: &'a mut Budget,
    chain: &'a mut Vec<String>,
) -> ExpandFuture<'a> {
    Box::pin(async move {
        let mut nested_root = None;

        if let Some(uri) = node.content_uri() {
            let resolved = resolve_content_uri(uri, current_dir);

            if is_tileset_document(&resolved) && budget.take() {
                if chain.contains(&resolved) {
                    return Err(TilesetError::StructuralViolation(format!(
                        "tileset cycle: {} -> {}",
                        chain.join(" -> "),
                        resolved
                    ))
                    .into());
                }

                let nested = previous.resolve(&resolved).await?.into_tileset()?;
                let mut root = nested.root.clone();
                chain.push(resolved.clone());
                let result = expand_node(
                    &mut root,
                    dirname(&resolved),
                    root_dir,
                    previous,
                    budget,
                    chain,
                )
                .await;
                chain.pop();
                result?;
                debug!(nested = %resolved, "Expanded nested tileset");
                nested_root = Some(root);
                node.content = None;
            } else if let Some(content) = node.content.as_mut() {
                content.set_target(relative_uri(root_dir, &resolved));
            }
        }

        for child in &mut node.children {
            expand_node(child, current_dir, root_dir, previous, budget, chain).await?;
        }

        if let Some(root) = nested_root {
            node.children.push(root);
        }
        Ok(())
    })
}

#[async_trait]
impl Filter for FetchFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Both
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        // Payloads keep the name they were requested under.
        if !is_tileset_document(target) {
            return previous.resolve(target).await;
        }

        let shared = previous.resolve(target).await?.into_tileset()?;
        let mut tileset = Tileset::clone(&shared);
        let expanded = self.expand(&mut tileset, target, previous).await?;
        debug!(target, expanded, "Fetched nested tilesets");
        Ok(Resource::Json(Arc::new(tileset)))
    }
}

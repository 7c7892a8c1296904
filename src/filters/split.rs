use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Args, Filter};
use crate::cache::KeyedCache;
use crate::error::{PipelineError, TilesetError};
use crate::pipeline::{FilterContext, Resource, Stage, TargetKinds};
use crate::tileset::{basename, count_leaves, dirname, join, nodes_region, Asset, Node, Tileset};

/// Masters whose split tables are kept in memory.
const SPLIT_TABLE_CAPACITY: usize = 32;

/// Result of splitting one master document.
#[derive(Debug, Clone)]
pub struct SplitOutput {
    /// The reduced master
    pub master: Tileset,
    /// Emitted child documents in emission order, named relative to the
    /// master's directory
    pub documents: Vec<(String, Tileset)>,
}

/// Smallest `m` with `m^(split_count + 1) >= leaves`.
fn max_document_size(leaves: usize, split_count: u32) -> usize {
    let exponent = split_count.saturating_add(1);
    let reaches = |m: usize| {
        m.checked_pow(exponent)
            .map_or(true, |power| power >= leaves)
    };

    let mut size = (leaves as f64).powf(1.0 / exponent as f64).ceil().max(1.0) as usize;
    while size > 1 && reaches(size - 1) {
        size -= 1;
    }
    while !reaches(size) {
        size += 1;
    }
    size
}

/// Cut `tileset` into a master and numbered child documents.
///
/// Every document, the master included, ends up with at most
/// `ceil(L^(1/(split_count + 1)))` leaves, `L` being the leaf count of the
/// input. Child documents are named `{name}{n}.json`, numbered from 1 in the
/// depth-first order they are emitted, copy the master's asset and live next
/// to the master, so content URIs inside them keep resolving.
pub fn split_tileset(
    tileset: &Tileset,
    split_count: u32,
    name: &str,
) -> Result<SplitOutput, TilesetError> {
    let leaves = count_leaves(&tileset.root);
    let mut splitter = Splitter {
        max_size: max_document_size(leaves, split_count),
        name,
        asset: &tileset.asset,
        documents: Vec::new(),
    };

    let mut master = tileset.clone();
    let remaining = splitter.reduce(&mut master.root)?;
    debug!(
        leaves,
        max_size = splitter.max_size,
        documents = splitter.documents.len(),
        master_leaves = remaining,
        "Split tileset"
    );

    Ok(SplitOutput {
        master,
        documents: splitter.documents,
    })
}

struct Splitter<'a> {
    max_size: usize,
    name: &'a str,
    asset: &'a Asset,
    documents: Vec<(String, Tileset)>,
}

impl Splitter<'_> {
    /// Reduce the subtree so it holds at most `max_size` leaves and return
    /// the leaves left in it.
    fn reduce(&mut self, node: &mut Node) -> Result<usize, TilesetError> {
        if node.is_leaf() {
            return Ok(1);
        }

        let mut counts = Vec::with_capacity(node.children.len());
        for child in &mut node.children {
            counts.push(self.reduce(child)?);
        }

        // Each pass replaces groups by single reference leaves; once every
        // child counts 1, each pass divides the child count by max_size.
        let mut total: usize = counts.iter().sum();
        while total > self.max_size && self.max_size > 1 {
            counts = self.pack(node, &counts)?;
            total = counts.iter().sum();
        }
        Ok(total)
    }

    /// Greedily pack consecutive children into groups of at most `max_size`
    /// leaves and move each group to its own document.
    fn pack(&mut self, node: &mut Node, counts: &[usize]) -> Result<Vec<usize>, TilesetError> {
        let mut groups: Vec<Vec<Node>> = Vec::new();
        let mut group_size = 0;
        for (child, &count) in std::mem::take(&mut node.children).into_iter().zip(counts) {
            match groups.last_mut() {
                Some(group) if group_size + count <= self.max_size => {
                    group.push(child);
                    group_size += count;
                }
                _ => {
                    groups.push(vec![child]);
                    group_size = count;
                }
            }
        }

        let mut packed_counts = Vec::with_capacity(groups.len());
        for mut group in groups {
            // A lone leaf gains nothing from its own document.
            if group.len() == 1 && group[0].is_leaf() {
                node.children.append(&mut group);
            } else {
                let root = self.group_root(node, group)?;
                node.children.push(self.emit(root)?);
            }
            packed_counts.push(1);
        }
        Ok(packed_counts)
    }

    fn group_root(&self, parent: &Node, mut group: Vec<Node>) -> Result<Node, TilesetError> {
        if group.len() == 1 {
            if let Some(only) = group.pop() {
                return Ok(only);
            }
        }
        let mut root = Node::new(nodes_region(group.iter())?, parent.geometric_error);
        root.refine = parent.refine;
        root.children = group;
        Ok(root)
    }

    /// Store `root` as the next numbered document and return the leaf
    /// referencing it.
    fn emit(&mut self, root: Node) -> Result<Node, TilesetError> {
        let file_name = format!("{}{}.json", self.name, self.documents.len() + 1);
        let reference = Node::leaf(root.region()?, root.geometric_error, file_name.clone());

        let mut document = Tileset::new(root);
        document.asset = self.asset.clone();
        self.documents.push((file_name, document));
        Ok(reference)
    }
}

/// Documents produced by splitting one master, keyed by identifier.
struct SplitTable {
    master: Arc<Tileset>,
    documents: HashMap<String, Arc<Tileset>>,
}

/// Serves a master document cut into balanced numbered documents.
///
/// Every document named like the master is treated as the master of its
/// own directory, not only the one at the served root. Each directory gets
/// its own table and its own numbering, so the masters of a merged tree
/// split independently. Other documents pass through unchanged.
pub struct SplitFilter {
    split_count: u32,
    name: String,
    master_name: String,
    tables: KeyedCache<String, Arc<SplitTable>, PipelineError>,
}

impl SplitFilter {
    pub fn new(split_count: u32, name: impl Into<String>, master_name: impl Into<String>) -> Self {
        Self {
            split_count,
            name: name.into(),
            master_name: master_name.into(),
            tables: KeyedCache::lru(SPLIT_TABLE_CAPACITY),
        }
    }

    pub(crate) fn from_args(args: &Args<'_>, context: &FilterContext<'_>) -> Result<Self, PipelineError> {
        args.at_most(2)?;
        let split_count: u32 = args.parse_or(0, 1)?;
        let name = args.raw(1).unwrap_or_default();
        if name.contains('/') {
            return Err(args.invalid("document name prefix cannot contain '/'"));
        }
        Ok(Self::new(split_count, name, context.build.master_name.clone()))
    }

    async fn table(&self, master_id: &str, previous: &dyn Stage) -> Result<Arc<SplitTable>, PipelineError> {
        self.tables
            .get_or_try_insert(master_id.to_string(), || async {
                let shared = previous.resolve(master_id).await?.into_tileset()?;
                let output = split_tileset(&shared, self.split_count, &self.name)?;

                let dir = dirname(master_id);
                let documents: HashMap<String, Arc<Tileset>> = output
                    .documents
                    .into_iter()
                    .map(|(file_name, document)| (join(dir, &file_name), Arc::new(document)))
                    .collect();
                info!(master = master_id, documents = documents.len(), "Built split table");

                Ok(Arc::new(SplitTable {
                    master: Arc::new(output.master),
                    documents,
                }))
            })
            .await
    }
}

#[async_trait]
impl Filter for SplitFilter {
    fn kinds(&self) -> TargetKinds {
        TargetKinds::Json
    }

    async fn apply(&self, target: &str, previous: &dyn Stage) -> Result<Resource, PipelineError> {
        if basename(target) == self.master_name {
            let table = self.table(target, previous).await?;
            return Ok(Resource::Json(Arc::clone(&table.master)));
        }

        // A numbered document is served from its directory's master table,
        // which is built on demand.
        let master_id = join(dirname(target), &self.master_name);
        match self.table(&master_id, previous).await {
            Ok(table) => match table.documents.get(target) {
                Some(document) => Ok(Resource::Json(Arc::clone(document))),
                None => previous.resolve(target).await,
            },
            Err(e) if e.is_not_found() => previous.resolve(target).await,
            Err(e) => Err(e),
        }
    }
}

//! Stateless traversal and geometry over the tile tree.

use url::Url;

use super::model::{Node, Region};
use crate::error::TilesetError;

// =============================================================================
// Traversal
// =============================================================================

/// Lazy pre-order iterator over a subtree.
pub struct Nodes<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Nodes<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// All nodes of the subtree rooted at `root`, parents before children.
pub fn nodes(root: &Node) -> Nodes<'_> {
    Nodes { stack: vec![root] }
}

/// Collect the nodes matching `predicate`.
pub fn leaves<'a, P>(root: &'a Node, predicate: P) -> Vec<&'a Node>
where
    P: Fn(&Node) -> bool,
{
    nodes(root).filter(|node| predicate(node)).collect()
}

/// Childless nodes of the subtree.
pub fn childless(root: &Node) -> Vec<&Node> {
    leaves(root, Node::is_leaf)
}

/// Number of childless nodes of the subtree.
pub fn count_leaves(root: &Node) -> usize {
    nodes(root).filter(|node| node.is_leaf()).count()
}

/// Visit every node of the subtree mutably, parents before children.
pub fn walk_mut<F>(root: &mut Node, visit: &mut F)
where
    F: FnMut(&mut Node),
{
    visit(root);
    for child in &mut root.children {
        walk_mut(child, visit);
    }
}

/// Resolve every relative content reference of the subtree against `dir`.
pub fn rebase_content(root: &mut Node, dir: &str) {
    walk_mut(root, &mut |node: &mut Node| {
        if let Some(content) = node.content.as_mut() {
            if let Some(uri) = content.target() {
                let resolved = resolve_content_uri(uri, dir);
                content.set_target(resolved);
            }
        }
    });
}

// =============================================================================
// Geometry
// =============================================================================

/// Coordinate-wise union of regions.
///
/// Returns `InvalidArgument` for an empty input.
pub fn bounding_region<I>(regions: I) -> Result<Region, TilesetError>
where
    I: IntoIterator<Item = Region>,
{
    let mut regions = regions.into_iter();
    let mut union = regions.next().ok_or_else(|| {
        TilesetError::InvalidArgument("bounding region of an empty set".to_string())
    })?;

    for region in regions {
        union[0] = union[0].min(region[0]);
        union[1] = union[1].min(region[1]);
        union[2] = union[2].max(region[2]);
        union[3] = union[3].max(region[3]);
        union[4] = union[4].min(region[4]);
        union[5] = union[5].max(region[5]);
    }

    Ok(union)
}

/// Union of the regions of `nodes`.
pub fn nodes_region<'a, I>(nodes: I) -> Result<Region, TilesetError>
where
    I: IntoIterator<Item = &'a Node>,
{
    let regions = nodes
        .into_iter()
        .map(Node::region)
        .collect::<Result<Vec<_>, _>>()?;
    bounding_region(regions)
}

/// Whether `outer` contains `inner`.
pub fn region_contains(outer: &Region, inner: &Region) -> bool {
    outer[0] <= inner[0]
        && outer[1] <= inner[1]
        && outer[2] >= inner[2]
        && outer[3] >= inner[3]
        && outer[4] <= inner[4]
        && outer[5] >= inner[5]
}

// =============================================================================
// Identifiers and URIs
// =============================================================================

/// Whether `uri` carries a scheme (`https://...`, `file:...`).
///
/// Single-letter schemes are treated as drive letters, not schemes.
pub fn has_scheme(uri: &str) -> bool {
    match Url::parse(uri) {
        Ok(url) => url.scheme().len() > 1,
        Err(_) => false,
    }
}

/// Whether `id` names a tileset document rather than a binary payload.
pub fn is_tileset_document(id: &str) -> bool {
    let last = id.rsplit('/').next().unwrap_or(id);
    let name = last.split('?').next().unwrap_or(last);
    name.to_ascii_lowercase().ends_with(".json")
}

/// Directory part of an identifier (`""` for a bare name).
pub fn dirname(id: &str) -> &str {
    let path = id.split('?').next().unwrap_or(id);
    match path.rfind('/') {
        Some(index) => &id[..index],
        None => "",
    }
}

/// Last segment of an identifier.
pub fn basename(id: &str) -> &str {
    let path = id.split('?').next().unwrap_or(id);
    path.rsplit('/').next().unwrap_or(path)
}

/// Join `parts` with `/`, skipping empty ones.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        dir.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Resolve a content URI against the directory of the referencing document.
///
/// Absolute URIs pass through; relative ones are joined with forward-slash
/// semantics and `.`/`..` segments are collapsed.
pub fn resolve_content_uri(uri: &str, current_dir: &str) -> String {
    if has_scheme(uri) {
        return uri.to_string();
    }

    if has_scheme(current_dir) {
        let base = format!("{}/", current_dir.trim_end_matches('/'));
        if let Ok(joined) = Url::parse(&base).and_then(|base| base.join(uri)) {
            return joined.to_string();
        }
    }

    let joined = if uri.starts_with('/') {
        uri.trim_start_matches('/').to_string()
    } else {
        join(current_dir, uri)
    };
    normalize(&joined)
}

/// Express the identifier `target` relative to the directory `base_dir`.
pub fn relative_uri(base_dir: &str, target: &str) -> String {
    if has_scheme(target) {
        return target.to_string();
    }

    let base: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    let target_segments: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();

    let common = base
        .iter()
        .zip(target_segments.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = std::iter::repeat("..").take(base.len() - common).collect();
    parts.extend_from_slice(&target_segments[common..]);
    parts.join("/")
}

/// Collapse `.` and `..` segments of a relative path.
fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use super::write_file;
use crate::error::PipelineError;
use crate::pipeline::{Operation, Resolved, Resolver};
use crate::tileset::{dirname, has_scheme, nodes, resolve_content_uri};

/// Counts of what [`materialize`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Tileset documents written
    pub documents: usize,
    /// Payloads written
    pub payloads: usize,
    /// Absolute or out-of-tree references left alone
    pub skipped: usize,
}

/// Resolve `master` through `operations` and write it, together with every
/// document and payload it references, under `out_dir`.
///
/// References are followed depth-first. Absolute URIs, and relative ones
/// climbing above the served root, are not written.
pub async fn materialize(
    resolver: &Resolver,
    operations: &[Operation],
    master: &str,
    out_dir: &Path,
) -> Result<MaterializeReport, PipelineError> {
    let mut report = MaterializeReport::default();
    let mut seen = HashSet::new();
    let mut pending = vec![resolver.canonical_target(master)];

    while let Some(target) = pending.pop() {
        if !seen.insert(target.clone()) {
            continue;
        }
        let Some(path) = output_path(out_dir, &target) else {
            warn!(target = %target, "Reference leaves the output directory, skipping");
            report.skipped += 1;
            continue;
        };

        match resolver.resolve_operations(&target, operations).await? {
            Resolved::Json(tileset) => {
                let dir = dirname(&target);
                let mut references: Vec<String> = Vec::new();
                for uri in nodes(&tileset.root).filter_map(|node| node.content_uri()) {
                    if has_scheme(uri) {
                        report.skipped += 1;
                        continue;
                    }
                    references.push(resolve_content_uri(uri, dir));
                }
                // Reversed so the stack pops them in document order.
                pending.extend(references.into_iter().rev());

                write_file(&path, &tileset.to_vec()?).await?;
                report.documents += 1;
            }
            Resolved::Binary(data) => {
                write_file(&path, &data).await?;
                report.payloads += 1;
            }
        }
        debug!(target = %target, path = %path.display(), "Materialized");
    }

    info!(
        out_dir = %out_dir.display(),
        documents = report.documents,
        payloads = report.payloads,
        skipped = report.skipped,
        "Materialized tileset"
    );
    Ok(report)
}

/// File under `out_dir` for `target`, or `None` if it would land outside.
fn output_path(out_dir: &Path, target: &str) -> Option<PathBuf> {
    let relative = Path::new(target.split('?').next().unwrap_or(target));
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return None;
    }
    Some(out_dir.join(relative))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::pipeline::{parse_pipeline, BuildContext, PipelineBuilder};
    use crate::source::FileSource;
    use crate::tileset::{Node, Tileset};

    fn region() -> [f64; 6] {
        [0.0, 0.0, 1.0, 1.0, 0.0, 1.0]
    }

    fn write(path: &Path, data: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn fixture(root: &Path) {
        let nested = Tileset::new(Node::leaf(region(), 0.0, "n.b3dm"));
        let master = Tileset::new(Node::inner(
            region(),
            1.0,
            vec![
                Node::leaf(region(), 0.0, "0.b3dm"),
                Node::leaf(region(), 0.0, "sub/tileset.json"),
                Node::leaf(region(), 0.0, "https://cdn.example.org/far.b3dm"),
                Node::leaf(region(), 0.0, "../outside.b3dm"),
            ],
        ));
        write(&root.join("tileset.json"), &master.to_vec().unwrap());
        write(&root.join("0.b3dm"), b"zero");
        write(&root.join("sub/tileset.json"), &nested.to_vec().unwrap());
        write(&root.join("sub/n.b3dm"), b"nested");
    }

    fn resolver(root: &Path) -> Resolver {
        let context = BuildContext::new(Arc::new(FileSource::new(root)));
        Resolver::new(Arc::new(PipelineBuilder::new(context)))
    }

    #[tokio::test]
    async fn test_materialize_writes_reachable_tree() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fixture(input.path());

        let report = materialize(&resolver(input.path()), &[], "", output.path())
            .await
            .unwrap();

        assert_eq!(report.documents, 2);
        assert_eq!(report.payloads, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(std::fs::read(output.path().join("sub/n.b3dm")).unwrap(), b"nested");
        assert!(output.path().join("tileset.json").exists());
    }

    #[tokio::test]
    async fn test_materialize_flattened_pipeline() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fixture(input.path());
        let operations = parse_pipeline("fetch").unwrap();

        let report = materialize(&resolver(input.path()), &operations, "tileset.json", output.path())
            .await
            .unwrap();

        assert_eq!(report.documents, 1);
        assert!(!output.path().join("sub/tileset.json").exists());
        assert_eq!(std::fs::read(output.path().join("sub/n.b3dm")).unwrap(), b"nested");
    }

    #[test]
    fn test_output_path_rejects_escapes() {
        let out = Path::new("/out");
        assert_eq!(output_path(out, "a/b.b3dm"), Some(PathBuf::from("/out/a/b.b3dm")));
        assert_eq!(output_path(out, "../x.b3dm"), None);
        assert_eq!(output_path(out, "/etc/passwd"), None);
        assert_eq!(output_path(out, "a.b3dm?v=1"), Some(PathBuf::from("/out/a.b3dm")));
    }
}

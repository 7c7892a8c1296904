use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tracing::info;

use super::write_file;
use crate::error::PipelineError;
use crate::source::get_bytes;
use crate::tileset::{dirname, is_tileset_document, resolve_content_uri, walk_mut, Node, Tileset};

type GrabFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'a>>;

struct Downloader<'a> {
    client: &'a reqwest::Client,
    out_dir: &'a Path,
    next: usize,
    /// Absolute document URL -> local file name
    seen: HashMap<String, String>,
}

/// Copy the tileset at `url` and every document it references into
/// `out_dir`.
///
/// The master is written as `<out_dir>/<master_name>`, nested documents as
/// `1.json`, `2.json`, ... in the order they are met. Payload references are
/// relinked to their absolute URLs, so payloads stay on the remote server.
/// A document referenced more than once, cycles included, is fetched once
/// and every reference is linked to the same local file.
/// Returns the number of documents written.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    out_dir: &Path,
    master_name: &str,
) -> Result<usize, PipelineError> {
    let url = url::Url::parse(url).map_or_else(|_| url.to_string(), String::from);
    let mut seen = HashMap::new();
    seen.insert(url.clone(), master_name.to_string());
    let mut downloader = Downloader {
        client,
        out_dir,
        next: 1,
        seen,
    };
    downloader.grab(url.clone(), master_name.to_string()).await?;

    let documents = downloader.next;
    info!(url = %url, out_dir = %out_dir.display(), documents, "Downloaded tileset");
    Ok(documents)
}

impl<'a> Downloader<'a> {
    fn grab(&mut self, url: String, name: String) -> GrabFuture<'_> {
        Box::pin(async move {
            let data = get_bytes(self.client, &url).await?;
            let mut tileset = Tileset::from_slice(&data)?;

            // Name nested documents first so the walk stays synchronous.
            let base = dirname(&url).to_string();
            let mut nested: Vec<(String, String)> = Vec::new();
            let next = &mut self.next;
            let seen = &mut self.seen;
            walk_mut(&mut tileset.root, &mut |node: &mut Node| {
                if let Some(content) = node.content.as_mut() {
                    if let Some(uri) = content.target() {
                        let absolute = resolve_content_uri(uri, &base);
                        if let Some(local) = seen.get(&absolute) {
                            content.set_target(local.clone());
                        } else if is_tileset_document(&absolute) {
                            let local = format!("{}.json", next);
                            *next += 1;
                            seen.insert(absolute.clone(), local.clone());
                            nested.push((absolute, local.clone()));
                            content.set_target(local);
                        } else {
                            content.set_target(absolute);
                        }
                    }
                }
            });

            write_file(&self.out_dir.join(&name), &tileset.to_vec()?).await?;
            info!(url = %url, name = %name, "Wrote document");

            for (nested_url, local) in nested {
                self.grab(nested_url, local).await?;
            }
            Ok(())
        })
    }
}

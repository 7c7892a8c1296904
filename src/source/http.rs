use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::TileSource;
use crate::error::IoError;
use crate::tileset::has_scheme;

/// HTTP(S) source rooted at a base URL.
///
/// Relative identifiers are joined onto the base URL; absolute URLs are
/// fetched as-is.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    base: Url,
    identifier: String,
}

impl HttpSource {
    /// Create a source for `base_url` with a default client.
    pub fn new(base_url: &str) -> Result<Self, IoError> {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a source sharing an existing client.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, IoError> {
        // Without a trailing slash `join` would replace the last segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base = Url::parse(&normalized)
            .map_err(|e| IoError::Http(format!("invalid base URL '{}': {}", base_url, e)))?;
        Ok(Self {
            client,
            identifier: base_url.trim_end_matches('/').to_string(),
            base,
        })
    }

    /// The URL an identifier resolves to.
    pub fn url_for(&self, id: &str) -> Result<Url, IoError> {
        if has_scheme(id) {
            return Url::parse(id).map_err(|e| IoError::Http(format!("{}: {}", id, e)));
        }
        self.base
            .join(id.trim_start_matches('/'))
            .map_err(|e| IoError::Http(format!("{}: {}", id, e)))
    }
}

/// GET `url` and return the body, mapping 404 to `NotFound`.
pub(crate) async fn get_bytes(client: &Client, url: &str) -> Result<Bytes, IoError> {
    debug!(url, "HTTP GET");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| IoError::Http(format!("{}: {}", url, e)))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(IoError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(IoError::Http(format!("{}: HTTP {}", url, status)));
    }

    response
        .bytes()
        .await
        .map_err(|e| IoError::Http(format!("{}: {}", url, e)))
}

#[async_trait]
impl TileSource for HttpSource {
    async fn fetch(&self, id: &str) -> Result<Bytes, IoError> {
        let url = self.url_for(id)?;
        get_bytes(&self.client, url.as_str()).await
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

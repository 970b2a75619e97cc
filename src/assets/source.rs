/// Where asset bytes come from.
///
/// The rendered document references attachments by host-specific URLs
/// (`app://<host>/<path>`) or by paths relative to the stylesheet. An
/// `AssetSource` turns such a reference into bytes plus, when the transport
/// knows it, a content type.
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{PublishError, Result};

/// Bytes fetched for one asset reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub data: Vec<u8>,
    /// Content type reported by the transport, if any.
    pub content_type: Option<String>,
}

#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch the asset behind `url`.
    async fn fetch(&self, url: &str) -> Result<FetchedAsset>;
}

/// Reads assets from the local filesystem.
///
/// `app://<host>/<path>` URLs map to the absolute path `/<path>`; relative
/// references resolve under `root` and may not climb out of it.
#[derive(Debug, Clone)]
pub struct FsAssetSource {
    root: PathBuf,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map an asset reference to a filesystem path.
    pub fn resolve(&self, url: &str) -> Result<PathBuf> {
        let url = strip_query(url);

        if let Some(rest) = url.strip_prefix("app://") {
            let (_host, path) = rest
                .split_once('/')
                .ok_or_else(|| PublishError::Known(format!("Unsupported asset URL: {url}")))?;
            let decoded = decode_path(path)?;
            // Windows drive paths (`C:/...`) are already absolute.
            if decoded.chars().nth(1) == Some(':') {
                return Ok(PathBuf::from(decoded));
            }
            return Ok(PathBuf::from(format!("/{decoded}")));
        }

        if url.contains("://") || url.starts_with("//") {
            return Err(PublishError::Known(format!("Unsupported asset URL: {url}")));
        }

        let decoded = decode_path(url)?;
        let relative = Path::new(decoded.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(PublishError::Known(format!(
                "Asset path escapes the vault: {url}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

fn decode_path(path: &str) -> Result<String> {
    urlencoding::decode(path)
        .map(|p| p.into_owned())
        .map_err(|e| PublishError::Known(format!("Malformed asset path {path}: {e}")))
}

#[async_trait]
impl AssetSource for FsAssetSource {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        let path = self.resolve(url)?;
        debug!(url = %url, path = %path.display(), "Reading local asset");
        let data = tokio::fs::read(&path).await?;
        Ok(FetchedAsset {
            data,
            content_type: None,
        })
    }
}

/// Publish index: which documents are published, and under what link.
///
/// A document keeps its remote filename and decryption key across
/// republishes so previously shared URLs keep working. The index is the
/// local record of that identity, keyed by the document's host path. It is
/// only updated after a note upload succeeds.
use std::collections::BTreeMap;
use std::path::Path;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{PublishError, Result};

/// Current index format version.
pub const INDEX_VERSION: u8 = 1;

/// Filename and key recovered from a share URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareUrlParts {
    pub filename: String,
    /// Empty for unencrypted notes.
    pub decryption_key: String,
}

/// Extract the note filename and key fragment from a share URL.
///
/// Accepts `https://host/<filename>#<key>` as well as URLs with a path
/// prefix (`https://host/u/<filename>`) or an `.html` suffix.
pub fn parse_share_url(link: &str) -> Option<ShareUrlParts> {
    let url = Url::parse(link.trim()).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    let filename = segment.strip_suffix(".html").unwrap_or(segment);
    if filename.is_empty() || !filename.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ShareUrlParts {
        filename: filename.to_string(),
        decryption_key: url.fragment().unwrap_or_default().to_string(),
    })
}

/// A document's published identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedLink {
    pub filename: String,
    /// Empty when the note is published unencrypted.
    #[serde(default)]
    pub decryption_key: String,
    /// Note URL without the key fragment.
    pub url: String,
}

impl PublishedLink {
    /// Rebuild a link from a share URL stored in document metadata.
    pub fn from_share_url(link: &str) -> Option<Self> {
        let parts = parse_share_url(link)?;
        let mut url = Url::parse(link.trim()).ok()?;
        url.set_fragment(None);
        Some(Self {
            filename: parts.filename,
            decryption_key: parts.decryption_key,
            url: url.to_string(),
        })
    }

    pub fn is_encrypted(&self) -> bool {
        !self.decryption_key.is_empty()
    }

    /// The link handed to readers: `url#key`, or the bare URL.
    pub fn share_link(&self) -> String {
        if self.is_encrypted() {
            format!("{}#{}", self.url, self.decryption_key)
        } else {
            self.url.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishIndex {
    pub version: u8,
    #[serde(default)]
    entries: BTreeMap<String, PublishedLink>,
}

impl Default for PublishIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

fn stem(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    name.strip_suffix(".md").unwrap_or(name)
}

impl PublishIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from `(document path, stored share link)` pairs, skipping
    /// links that do not parse.
    pub fn from_metadata<I, P, L>(documents: I) -> Self
    where
        I: IntoIterator<Item = (P, L)>,
        P: Into<String>,
        L: AsRef<str>,
    {
        let mut index = Self::new();
        for (path, link) in documents {
            if let Some(published) = PublishedLink::from_share_url(link.as_ref()) {
                index.insert(path, published);
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&PublishedLink> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, link: PublishedLink) -> Option<PublishedLink> {
        self.entries.insert(path.into(), link)
    }

    pub fn remove(&mut self, path: &str) -> Option<PublishedLink> {
        self.entries.remove(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PublishedLink)> {
        self.entries.iter().map(|(path, link)| (path.as_str(), link))
    }

    /// Resolve an internal link target (`Note`, `folder/Note.md`,
    /// `Note#Heading`) to a published document.
    ///
    /// Exact paths win; otherwise a bare name matches when exactly one
    /// published document has that file stem.
    pub fn resolve(&self, target: &str) -> Option<&PublishedLink> {
        let target = target.split(['#', '|']).next().unwrap_or(target).trim();
        if target.is_empty() {
            return None;
        }
        if let Some(link) = self
            .entries
            .get(target)
            .or_else(|| self.entries.get(&format!("{target}.md")))
        {
            return Some(link);
        }

        let wanted = stem(target);
        let mut matches = self
            .entries
            .iter()
            .filter(|(path, _)| stem(path) == wanted)
            .map(|(_, link)| link);
        match (matches.next(), matches.next()) {
            (Some(link), None) => Some(link),
            _ => None,
        }
    }

    /// Find the document published under a remote filename.
    pub fn find_by_filename(&self, filename: &str) -> Option<(&str, &PublishedLink)> {
        self.iter().find(|(_, link)| link.filename == filename)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| PublishError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let index: Self =
            serde_json::from_slice(data).map_err(|e| PublishError::Serialization(e.to_string()))?;
        if index.version > INDEX_VERSION {
            return Err(PublishError::Serialization(format!(
                "Unsupported index version {}",
                index.version
            )));
        }
        Ok(index)
    }

    /// Load from disk; a missing file is an empty index.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(data) => Self::from_bytes(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.to_bytes()?).await?;
        Ok(())
    }
}

/// Upload queue with batched existence checks.
///
/// Producers enqueue assets during a publish pass and receive a unique
/// placeholder token to put where the asset URL belongs. `drain` then:
/// 1. asks the server in one request which digests are already hosted
/// 2. uploads the rest concurrently
/// 3. returns a `BatchResult` mapping every resolved placeholder to a URL
///
/// Identical content enqueued twice is queried and uploaded once. The queue
/// is emptied at the start of every drain, whatever the outcome.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::crypto::ContentDigest;
use crate::document::Element;
use crate::error::{AssetFailure, Result};
use crate::storage::{FileUpload, RemoteStore};
use crate::template::CssFile;

const PLACEHOLDER_PREFIX: &str = "sharenote-asset-";

/// Process-wide, so placeholders from different queues never collide.
static NEXT_PLACEHOLDER: AtomicU64 = AtomicU64::new(0);

/// A discovered asset waiting for a hosted URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    /// Upload filetype (extension).
    pub filetype: String,
    pub digest: ContentDigest,
    pub content: Vec<u8>,
    /// Token standing in for the URL until the queue drains.
    pub placeholder: String,
}

impl AssetRecord {
    pub fn byte_length(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Rewrites asset bytes before they are queued (e.g. recompression).
pub trait AssetTransform: Send + Sync {
    /// Return the bytes and filetype to upload instead.
    fn transform(&self, filetype: String, content: Vec<u8>) -> (String, Vec<u8>);
}

/// Stage updates emitted while publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    CheckingFiles { queued: usize },
    Uploading { done: usize, total: usize },
    Stage(&'static str),
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl ProgressSink for () {
    fn report(&self, _progress: Progress) {}
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// Placeholder -> hosted URL, for every item that resolved.
    pub resolved: HashMap<String, String>,
    /// Unique files the server already had.
    pub existing: usize,
    /// Unique files uploaded in this drain.
    pub uploaded: usize,
    pub failures: Vec<AssetFailure>,
    /// Stylesheet the server currently holds for the user, if any.
    pub remote_css: Option<CssFile>,
}

impl BatchResult {
    pub fn url_for(&self, placeholder: &str) -> Option<&str> {
        self.resolved.get(placeholder).map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Replace every resolved placeholder in `text`.
    pub fn apply(&self, text: &str) -> String {
        if !text.contains(PLACEHOLDER_PREFIX) {
            return text.to_string();
        }
        self.resolved
            .iter()
            .fold(text.to_string(), |acc, (placeholder, url)| acc.replace(placeholder, url))
    }

    /// Replace resolved placeholders in every attribute of the tree.
    pub fn apply_to_element(&self, root: &mut Element) {
        root.for_each_mut(&mut |el| {
            for value in el.attributes.values_mut() {
                if value.contains(PLACEHOLDER_PREFIX) {
                    *value = self.apply(value);
                }
            }
        });
    }
}

/// Content identity used for deduplication.
type Group = (String, String);

pub struct UploadQueue {
    items: Vec<AssetRecord>,
    concurrency: usize,
    transform: Option<Arc<dyn AssetTransform>>,
}

impl UploadQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            items: Vec::new(),
            concurrency: concurrency.max(1),
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn AssetTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &AssetRecord> {
        self.items.iter()
    }

    /// Queue an asset and return the placeholder that will resolve to its URL.
    pub fn enqueue(&mut self, filetype: impl Into<String>, content: Vec<u8>) -> String {
        let (filetype, content) = match &self.transform {
            Some(transform) => transform.transform(filetype.into(), content),
            None => (filetype.into(), content),
        };
        let id = NEXT_PLACEHOLDER.fetch_add(1, Ordering::Relaxed);
        let placeholder = format!("{PLACEHOLDER_PREFIX}{id:016x}");
        self.items.push(AssetRecord {
            digest: ContentDigest::of(&content),
            filetype: filetype.to_ascii_lowercase(),
            content,
            placeholder: placeholder.clone(),
        });
        placeholder
    }

    /// Resolve every queued asset against the store.
    ///
    /// Only a failed existence check aborts the drain. Individual upload
    /// failures are reported in `BatchResult::failures`.
    pub async fn drain(
        &mut self,
        store: &dyn RemoteStore,
        progress: &dyn ProgressSink,
    ) -> Result<BatchResult> {
        let items = std::mem::take(&mut self.items);

        let mut order: Vec<Group> = Vec::new();
        let mut groups: HashMap<Group, (FileUpload, Vec<String>)> = HashMap::new();
        for item in items {
            let key = (item.digest.wire_hash(), item.filetype.clone());
            match groups.get_mut(&key) {
                Some((_, placeholders)) => placeholders.push(item.placeholder),
                None => {
                    let upload = FileUpload::from_digest(item.filetype, &item.digest, item.content);
                    order.push(key.clone());
                    groups.insert(key, (upload, vec![item.placeholder]));
                }
            }
        }

        progress.report(Progress::CheckingFiles {
            queued: order.len(),
        });
        let queries: Vec<_> = order
            .iter()
            .filter_map(|key| groups.get(key))
            .map(|(upload, _)| upload.query())
            .collect();
        let remote = store.check_files(&queries).await?;

        let mut result = BatchResult {
            remote_css: remote.css.clone(),
            ..Default::default()
        };
        let mut pending = Vec::new();
        for key in order {
            let Some((upload, placeholders)) = groups.remove(&key) else {
                continue;
            };
            match remote.url_for(&upload.hash, &upload.filetype) {
                Some(url) => {
                    debug!(file = %upload.filename, url = %url, "Already hosted");
                    result.existing += 1;
                    for placeholder in placeholders {
                        result.resolved.insert(placeholder, url.to_string());
                    }
                }
                None => pending.push((upload, placeholders)),
            }
        }

        let total = pending.len();
        if total > 0 {
            progress.report(Progress::Uploading { done: 0, total });
        }
        let mut uploads = stream::iter(pending)
            .map(|(upload, placeholders)| async move {
                let outcome = store.upload(&upload).await;
                (upload, placeholders, outcome)
            })
            .buffer_unordered(self.concurrency);

        let mut done = 0;
        while let Some((upload, placeholders, outcome)) = uploads.next().await {
            done += 1;
            match outcome {
                Ok(url) => {
                    result.uploaded += 1;
                    for placeholder in placeholders {
                        result.resolved.insert(placeholder, url.clone());
                    }
                }
                Err(e) => {
                    warn!(file = %upload.filename, error = %e, "Asset upload failed");
                    result.failures.push(AssetFailure {
                        filename: upload.filename,
                        reason: e.to_string(),
                    });
                }
            }
            progress.report(Progress::Uploading { done, total });
        }

        info!(
            existing = result.existing,
            uploaded = result.uploaded,
            failed = result.failures.len(),
            "Upload queue drained"
        );
        Ok(result)
    }
}

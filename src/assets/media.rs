/// Media elements in the note body (`img`, `video`, `audio`, `source`),
/// including `video` poster images.
use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::data_uri;
use super::filetype::classify;
use super::source::AssetSource;
use crate::document::Element;
use crate::queue::UploadQueue;

const MEDIA_TAGS: &[&str] = &["img", "video", "audio", "source"];

/// Counts from one scan of the document body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaScan {
    pub enqueued: usize,
    pub skipped: usize,
}

fn is_media(el: &Element) -> bool {
    MEDIA_TAGS.contains(&el.tag.as_str())
}

/// Attributes of `el` that may reference a media file.
fn media_attrs(el: &Element) -> &'static [&'static str] {
    match el.tag.as_str() {
        "video" => &["src", "poster"],
        _ if is_media(el) => &["src"],
        _ => &[],
    }
}

fn is_hosted(src: &str) -> bool {
    let lower = src.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("//")
}

/// Load and type one local media reference. `None` means skip it.
async fn load(src: &str, source: &dyn AssetSource) -> Option<(String, Vec<u8>)> {
    if let Some(decoded) = data_uri::parse(src) {
        let filetype = classify(Some(&decoded.media_type), None, &decoded.data);
        return filetype.map(|ext| (ext, decoded.data));
    }

    let fetched = match source.fetch(src).await {
        Ok(fetched) => fetched,
        Err(e) => {
            warn!(src = %src, error = %e, "Could not read media, skipping");
            return None;
        }
    };
    classify(fetched.content_type.as_deref(), Some(src), &fetched.data)
        .map(|ext| (ext, fetched.data))
}

/// Enqueue every local media source in `content` and point the element at
/// its queue placeholder. Already-hosted sources are left alone. Media whose
/// type cannot be determined is skipped. `alt` is dropped from rewritten
/// elements since it usually carries the local file name.
pub async fn extract_media_assets(
    content: &mut Element,
    source: &dyn AssetSource,
    queue: &mut UploadQueue,
) -> MediaScan {
    let mut sources: Vec<String> = Vec::new();
    for el in content.descendants() {
        for src in media_attrs(el).iter().filter_map(|name| el.attr(name)) {
            if !src.is_empty() && !is_hosted(src) && !sources.iter().any(|s| s == src) {
                sources.push(src.to_string());
            }
        }
    }

    let mut scan = MediaScan::default();
    let mut placeholders: HashMap<String, String> = HashMap::new();
    for src in sources {
        match load(&src, source).await {
            Some((filetype, data)) => {
                debug!(src = %src, filetype = %filetype, bytes = data.len(), "Queued media");
                placeholders.insert(src, queue.enqueue(filetype, data));
                scan.enqueued += 1;
            }
            None => {
                info!(src = %src, "Skipping media with unknown type");
                scan.skipped += 1;
            }
        }
    }

    content.for_each_mut(&mut |el| {
        for name in media_attrs(el) {
            let Some(placeholder) = el.attr(name).and_then(|src| placeholders.get(src)) else {
                continue;
            };
            let placeholder = placeholder.clone();
            el.set_attr(name, placeholder);
            if *name == "src" {
                el.remove_attr("alt");
            }
        }
    });

    scan
}

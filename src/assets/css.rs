/// Stylesheet processing: `url(...)` asset extraction and chunking.
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::data_uri;
use super::filetype::{css_extension_from_mime, is_css_whitelisted, plausible_extension, sniff};
use super::source::AssetSource;
use crate::queue::UploadQueue;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)'|([^)"'\s]*))\s*\)"#)
        .expect("url() pattern is valid")
});

/// A `url(...)` reference found in a stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssUrl {
    /// Byte range of the whole `url(...)` token.
    pub range: std::ops::Range<usize>,
    /// The unquoted reference.
    pub url: String,
}

/// Find every `url(...)` reference, in order.
pub fn find_urls(css: &str) -> Vec<CssUrl> {
    URL_PATTERN
        .captures_iter(css)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let url = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
            Some(CssUrl {
                range: whole.range(),
                url: url.as_str().trim().to_string(),
            })
        })
        .collect()
}

fn is_remote(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http:") || lower.starts_with("https:") || lower.starts_with("//")
}

/// Resolve a stylesheet reference to `(extension, bytes)` if it should be
/// re-hosted. Remote, fragment-only and non-whitelisted references yield
/// `None` and stay untouched.
async fn resolve(url: &str, source: &dyn AssetSource) -> Option<(String, Vec<u8>)> {
    if url.is_empty() || url.starts_with('#') || is_remote(url) {
        return None;
    }

    if url.get(..5).is_some_and(|s| s.eq_ignore_ascii_case("data:")) {
        let decoded = data_uri::parse(url)?;
        let extension = css_extension_from_mime(&decoded.media_type)
            .or_else(|| {
                sniff(&decoded.data)
                    .map(|t| t.extension)
                    .filter(|ext| is_css_whitelisted(ext))
            })?
            .to_string();
        return Some((extension, decoded.data));
    }

    let extension = plausible_extension(url).filter(|ext| is_css_whitelisted(ext))?;
    match source.fetch(url).await {
        Ok(fetched) => Some((extension, fetched.data)),
        Err(e) => {
            warn!(url = %url, error = %e, "Skipping stylesheet asset that could not be read");
            None
        }
    }
}

/// Enqueue every re-hostable stylesheet asset and return the stylesheet
/// with each such reference replaced by `url("<placeholder>")`.
pub async fn extract_css_assets(
    css: &str,
    source: &dyn AssetSource,
    queue: &mut UploadQueue,
) -> String {
    let refs = find_urls(css);
    let mut out = String::with_capacity(css.len());
    let mut last = 0;

    for css_url in refs {
        let Some((extension, data)) = resolve(&css_url.url, source).await else {
            debug!(url = %css_url.url, "Leaving stylesheet reference untouched");
            continue;
        };
        let placeholder = queue.enqueue(extension, data);
        out.push_str(&css[last..css_url.range.start]);
        out.push_str("url(\"");
        out.push_str(&placeholder);
        out.push_str("\")");
        last = css_url.range.end;
    }

    out.push_str(&css[last..]);
    out
}

/// Split a stylesheet into ordered chunks of roughly `max_chunk_size` bytes.
///
/// A chunk closes at a top-level `}` once it reaches the budget. When the
/// budget is exceeded mid-rule, the chunk is cut back to the last top-level
/// rule end it contains. A rule that alone exceeds the budget is force-split
/// at 1.5x the budget, but never inside a string literal or comment.
/// Concatenating the chunks reproduces the input exactly.
pub fn split_css_into_chunks(css: &str, max_chunk_size: usize) -> Vec<String> {
    if css.is_empty() {
        return Vec::new();
    }
    if max_chunk_size == 0 || css.len() <= max_chunk_size {
        return vec![css.to_string()];
    }

    let force_at = max_chunk_size + max_chunk_size / 2;
    let bytes = css.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut last_rule_end: Option<usize> = None;
    let mut depth: usize = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    // Offset of the opening `/*` while inside a comment.
    let mut comment_start: Option<usize> = None;

    for (i, c) in css.char_indices() {
        let end = i + c.len_utf8();

        if let Some(open) = comment_start {
            // The closing `*` must come after the opening one, so `/*/` stays open.
            if c == '/' && i >= open + 3 && bytes[i - 1] == b'*' {
                comment_start = None;
            }
            continue;
        }
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if let Some(q) = quote {
            if c == q {
                quote = None;
            }
        } else {
            match c {
                '"' | '\'' => quote = Some(c),
                '/' if bytes.get(i + 1) == Some(&b'*') => comment_start = Some(i),
                '{' => depth += 1,
                '}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        last_rule_end = Some(end);
                        if end - start >= max_chunk_size {
                            chunks.push(css[start..end].to_string());
                            start = end;
                            last_rule_end = None;
                        }
                        continue;
                    }
                }
                _ => {}
            }
        }

        let len = end - start;
        if len <= max_chunk_size {
            continue;
        }
        if let Some(boundary) = last_rule_end.take() {
            chunks.push(css[start..boundary].to_string());
            start = boundary;
        } else if len >= force_at && quote.is_none() && !escaped && comment_start.is_none() {
            chunks.push(css[start..end].to_string());
            start = end;
        }
    }

    if start < css.len() {
        chunks.push(css[start..].to_string());
    }
    chunks
}

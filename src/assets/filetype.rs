/// File type classification for uploaded assets.
///
/// Types are resolved, in order, from:
/// 1. the transport content type (unless it is a generic octet stream)
/// 2. a plausible file extension on the source path
/// 3. magic-byte signatures (with a text sniff for SVG)
///
/// See https://en.wikipedia.org/wiki/List_of_file_signatures
use mime::Mime;

/// A known file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileType {
    pub extension: &'static str,
    pub mime: &'static str,
}

const fn ft(extension: &'static str, mime: &'static str) -> FileType {
    FileType { extension, mime }
}

/// A magic-byte signature. Every `(offset, bytes)` part must match.
struct Signature {
    parts: &'static [(usize, &'static [u8])],
    file_type: FileType,
}

const SIGNATURES: &[Signature] = &[
    Signature {
        parts: &[(0, &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A])],
        file_type: ft("png", "image/png"),
    },
    Signature {
        parts: &[(0, &[0xFF, 0xD8, 0xFF])],
        file_type: ft("jpg", "image/jpeg"),
    },
    Signature {
        parts: &[(0, b"GIF87a")],
        file_type: ft("gif", "image/gif"),
    },
    Signature {
        parts: &[(0, b"GIF89a")],
        file_type: ft("gif", "image/gif"),
    },
    Signature {
        parts: &[(0, b"RIFF"), (8, b"WEBP")],
        file_type: ft("webp", "image/webp"),
    },
    Signature {
        parts: &[(0, b"RIFF"), (8, b"WAVE")],
        file_type: ft("wav", "audio/wav"),
    },
    Signature {
        parts: &[(0, &[0x49, 0x49, 0x2A, 0x00])],
        file_type: ft("tif", "image/tiff"),
    },
    Signature {
        parts: &[(0, &[0x4D, 0x4D, 0x00, 0x2A])],
        file_type: ft("tif", "image/tiff"),
    },
    Signature {
        parts: &[(0, &[0x00, 0x00, 0x01, 0x00])],
        file_type: ft("ico", "image/x-icon"),
    },
    Signature {
        parts: &[(4, b"ftypavif")],
        file_type: ft("avif", "image/avif"),
    },
    Signature {
        parts: &[(4, b"ftypqt")],
        file_type: ft("mov", "video/quicktime"),
    },
    Signature {
        parts: &[(4, b"ftyp")],
        file_type: ft("mp4", "video/mp4"),
    },
    Signature {
        parts: &[(0, &[0x1A, 0x45, 0xDF, 0xA3])],
        file_type: ft("webm", "video/webm"),
    },
    Signature {
        parts: &[(0, b"OggS")],
        file_type: ft("ogg", "audio/ogg"),
    },
    Signature {
        parts: &[(0, b"ID3")],
        file_type: ft("mp3", "audio/mpeg"),
    },
    Signature {
        parts: &[(0, b"%PDF")],
        file_type: ft("pdf", "application/pdf"),
    },
    Signature {
        parts: &[(0, b"wOFF")],
        file_type: ft("woff", "font/woff"),
    },
    Signature {
        parts: &[(0, b"wOF2")],
        file_type: ft("woff2", "font/woff2"),
    },
    Signature {
        parts: &[(0, b"OTTO")],
        file_type: ft("otf", "font/otf"),
    },
    Signature {
        parts: &[(0, &[0x00, 0x01, 0x00, 0x00, 0x00])],
        file_type: ft("ttf", "font/ttf"),
    },
    // Two-byte BMP magic is weak, keep it last among binary formats.
    Signature {
        parts: &[(0, b"BM")],
        file_type: ft("bmp", "image/bmp"),
    },
];

const SVG: FileType = ft("svg", "image/svg+xml");

/// Extension -> accepted MIME types for assets pulled out of stylesheets.
pub const CSS_ATTACHMENT_WHITELIST: &[(&str, &[&str])] = &[
    (
        "ttf",
        &[
            "font/ttf",
            "application/x-font-ttf",
            "application/x-font-truetype",
            "font/truetype",
        ],
    ),
    ("otf", &["font/otf", "application/x-font-opentype"]),
    (
        "woff",
        &["font/woff", "application/font-woff", "application/x-font-woff"],
    ),
    (
        "woff2",
        &["font/woff2", "application/font-woff2", "application/x-font-woff2"],
    ),
    ("svg", &["image/svg+xml"]),
];

/// MIME essence -> extension for media found in the document body.
const MEDIA_MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/bmp", "bmp"),
    ("image/svg+xml", "svg"),
    ("image/tiff", "tif"),
    ("image/avif", "avif"),
    ("image/x-icon", "ico"),
    ("video/mp4", "mp4"),
    ("video/webm", "webm"),
    ("video/quicktime", "mov"),
    ("audio/mpeg", "mp3"),
    ("audio/ogg", "ogg"),
    ("audio/wav", "wav"),
    ("application/pdf", "pdf"),
];

fn essence(content_type: &str) -> Option<String> {
    let parsed: Mime = content_type.trim().parse().ok()?;
    Some(parsed.essence_str().to_ascii_lowercase())
}

/// Map a transport content type to an extension.
///
/// Generic `application/octet-stream` (and anything unparseable) yields
/// `None` so the caller falls through to extension or signature sniffing.
pub fn extension_from_mime(content_type: &str) -> Option<&'static str> {
    let essence = essence(content_type)?;
    if essence == mime::APPLICATION_OCTET_STREAM.essence_str() {
        return None;
    }
    MEDIA_MIME_EXTENSIONS
        .iter()
        .find(|(m, _)| *m == essence)
        .map(|(_, ext)| *ext)
        .or_else(|| css_extension_from_mime(&essence))
}

/// Map a MIME type to an extension using the stylesheet whitelist only.
pub fn css_extension_from_mime(content_type: &str) -> Option<&'static str> {
    let essence = essence(content_type)?;
    CSS_ATTACHMENT_WHITELIST
        .iter()
        .find(|(_, mimes)| mimes.contains(&essence.as_str()))
        .map(|(ext, _)| *ext)
}

/// Whether a stylesheet attachment with this extension may be re-hosted.
pub fn is_css_whitelisted(extension: &str) -> bool {
    let ext = extension.to_ascii_lowercase();
    CSS_ATTACHMENT_WHITELIST.iter().any(|(e, _)| *e == ext)
}

/// Extract a plausible extension (2-5 ASCII alphanumerics) from a path or URL.
pub fn plausible_extension(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || !(2..=5).contains(&ext.len()) {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric())
        || !ext.chars().any(|c| c.is_ascii_alphabetic())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn looks_like_svg(data: &[u8]) -> bool {
    let head = &data[..data.len().min(1024)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    (text.starts_with("<svg") || text.starts_with("<?xml") || text.starts_with("<!--"))
        && text.contains("<svg")
}

/// Identify bytes by their leading signature.
pub fn sniff(data: &[u8]) -> Option<FileType> {
    let by_signature = SIGNATURES.iter().find(|sig| {
        sig.parts.iter().all(|(offset, bytes)| {
            data.len() >= offset + bytes.len() && &data[*offset..offset + bytes.len()] == *bytes
        })
    });
    match by_signature {
        Some(sig) => Some(sig.file_type),
        None if looks_like_svg(data) => Some(SVG),
        None => None,
    }
}

/// Resolve the upload extension for an asset, or `None` if it cannot be typed.
pub fn classify(content_type: Option<&str>, path: Option<&str>, data: &[u8]) -> Option<String> {
    if let Some(ext) = content_type.and_then(extension_from_mime) {
        return Some(ext.to_string());
    }
    if let Some(ext) = path.and_then(plausible_extension) {
        return Some(ext);
    }
    sniff(data).map(|t| t.extension.to_string())
}

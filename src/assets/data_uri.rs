/// RFC 2397 `data:` URI decoding.
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;

const DEFAULT_MEDIA_TYPE: &str = "text/plain";

/// A decoded data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    /// Media type without parameters, lowercased. `text/plain` when omitted.
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Decode `data:[<mediatype>][;base64],<data>`.
///
/// Returns `None` when the input is not a data URI or the payload is
/// malformed.
pub fn parse(uri: &str) -> Option<DataUri> {
    let rest = uri.trim();
    let rest = rest
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .map(|_| &rest[5..])?;
    let (header, payload) = rest.split_once(',')?;

    let mut params = header.split(';').map(str::trim);
    let media_type = params
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MEDIA_TYPE)
        .to_ascii_lowercase();
    let is_base64 = params.any(|p| p.eq_ignore_ascii_case("base64"));

    let data = if is_base64 {
        let cleaned: String = urlencoding::decode(payload)
            .ok()?
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '=')
            .collect();
        STANDARD_NO_PAD.decode(cleaned.as_bytes()).ok()?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };

    Some(DataUri { media_type, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_payload() {
        let uri = parse("data:font/woff2;base64,d09GMgABAAAA").unwrap();
        assert_eq!(uri.media_type, "font/woff2");
        assert_eq!(&uri.data[..4], b"wOF2");
    }

    #[test]
    fn test_padding_and_whitespace_tolerated() {
        let a = parse("data:image/png;base64,aGVsbG8=").unwrap();
        let b = parse("data:image/png;base64, aGVs\nbG8").unwrap();
        assert_eq!(a.data, b"hello");
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_percent_encoded_payload() {
        let uri = parse("data:image/svg+xml;charset=utf8,%3Csvg%3E%3C/svg%3E").unwrap();
        assert_eq!(uri.media_type, "image/svg+xml");
        assert_eq!(uri.data, b"<svg></svg>");
    }

    #[test]
    fn test_default_media_type() {
        let uri = parse("data:,hi").unwrap();
        assert_eq!(uri.media_type, "text/plain");
        assert_eq!(uri.data, b"hi");
    }

    #[test]
    fn test_rejects_non_data_uri() {
        assert!(parse("https://example.com/a.png").is_none());
        assert!(parse("data:image/png;base64").is_none());
        assert!(parse("data:image/png;base64,!!!!").is_none());
    }
}

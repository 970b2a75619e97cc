/// SHA-256 content addressing for sharenote.
///
/// Every uploaded asset, stylesheet chunk and note is identified by the
/// digest of its bytes:
/// - the wire hash (hex prefix) keys the remote existence check
/// - the stem (fixed-width base-62) names the stored file
///
/// Identical bytes always produce the identical digest, so the digest plus
/// the declared file type is the sole deduplication key.
use std::fmt;

use sha2::{Digest, Sha256};

pub const DIGEST_LEN: usize = 32;

/// Number of hex characters sent to the server as the content hash.
pub const WIRE_HASH_LEN: usize = 32;

/// Width of the base-62 filename stem. 62^22 > 2^128, so the first 128 bits
/// of the digest always fit.
pub const STEM_LEN: usize = 22;

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// SHA-256 digest of a byte sequence.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; DIGEST_LEN]);

impl ContentDigest {
    /// Hash arbitrary data. Total over every input, including the empty one.
    pub fn of(data: impl AsRef<[u8]>) -> Self {
        Self(Sha256::digest(data.as_ref()).into())
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Lowercase hex prefix of `len` characters (capped at the full 64).
    pub fn truncated(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len);
        hex
    }

    /// Hash string used in check-files and upload requests.
    pub fn wire_hash(&self) -> String {
        self.truncated(WIRE_HASH_LEN)
    }

    /// Fixed-width base-62 re-encoding of the first 128 bits.
    pub fn stem(&self) -> String {
        let mut high = [0u8; 16];
        high.copy_from_slice(&self.0[..16]);
        let mut n = u128::from_be_bytes(high);

        let mut out = [b'0'; STEM_LEN];
        for slot in out.iter_mut().rev() {
            *slot = BASE62[(n % 62) as usize];
            n /= 62;
        }
        out.iter().map(|&b| b as char).collect()
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.truncated(16))
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hash arbitrary data with SHA-256.
pub fn digest(data: impl AsRef<[u8]>) -> ContentDigest {
    ContentDigest::of(data)
}

/// Hex SHA-256, used for the request signature (nonce + API secret).
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    ContentDigest::of(data).to_hex()
}

/// Build the storage filename for a digest: `<stem>.<ext>`.
///
/// The extension is lowercased and stripped of anything that is not
/// ASCII alphanumeric so the result is always a safe URL path segment.
pub fn addressable_filename(digest: &ContentDigest, extension: &str) -> String {
    let ext: String = extension
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if ext.is_empty() {
        digest.stem()
    } else {
        format!("{}.{}", digest.stem(), ext)
    }
}

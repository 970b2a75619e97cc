/// Secret material that is zeroized on drop.
///
/// Two secrets flow through a publish: the per-note decryption key (shared
/// through the URL fragment) and the API secret used to sign requests.
/// They never mix.
use std::fmt;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{PublishError, Result};

pub const KEY_LEN: usize = 32;

/// Length of an encoded key: 32 bytes as unpadded base64.
pub const ENCODED_KEY_LEN: usize = 43;

/// A 256-bit note decryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DecryptionKey([u8; KEY_LEN]);

impl DecryptionKey {
    /// Draw a fresh key from the OS RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Encode for the share-link fragment (43 chars, no padding).
    pub fn encode(&self) -> String {
        STANDARD_NO_PAD.encode(self.0)
    }

    /// Parse a key recovered from a share link.
    ///
    /// Accepts the standard or URL-safe alphabet, with or without padding.
    pub fn decode(encoded: &str) -> Result<Self> {
        let normalized: String = encoded
            .trim()
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                other => other,
            })
            .collect();

        let mut bytes = STANDARD_NO_PAD
            .decode(normalized.as_bytes())
            .map_err(|e| PublishError::Decryption(format!("Malformed key: {e}")))?;

        if bytes.len() != KEY_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(PublishError::Decryption(format!(
                "Key must be {KEY_LEN} bytes, got {len}"
            )));
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self(key))
    }
}

impl PartialEq for DecryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for DecryptionKey {}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecryptionKey(<redacted>)")
    }
}

/// The API secret shared with the publishing server.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiSecret(String);

impl ApiSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiSecret(<redacted>)")
    }
}

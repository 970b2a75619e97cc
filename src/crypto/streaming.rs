/// Chunked AEAD encryption for note payloads.
///
/// Plaintext is split into fixed-size chunks. Each chunk is encrypted with
/// the same key but a unique nonce:
///   chunk_nonce = base_nonce XOR chunk_index
/// The base nonce is drawn fresh for every `encrypt` call and travels with
/// the ciphertext, so reusing a recovered key on a republish never reuses a
/// (key, nonce) pair. The chunk index and a final-chunk flag are bound into
/// the AAD, so chunks cannot be reordered, duplicated or truncated.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::aead::{self, NONCE_LEN};
use crate::crypto::sensitive::DecryptionKey;
use crate::error::{PublishError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

const AAD_PREFIX: &[u8] = b"sharenote:v1";

/// The encrypted note body as embedded in the published template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 ciphertext chunks, in order.
    pub ciphertext: Vec<String>,
    /// Base64 base nonce for this encryption.
    pub nonce: String,
}

/// Output of one `encrypt` call: the ordered chunks plus the key that
/// decrypts them.
#[derive(Debug, Clone)]
pub struct EncryptionEnvelope {
    pub payload: EncryptedPayload,
    pub key: DecryptionKey,
}

impl EncryptionEnvelope {
    /// The decryption key as it appears in the share-link fragment.
    pub fn key_string(&self) -> String {
        self.key.encode()
    }
}

/// Derive a per-chunk nonce by XORing the base nonce with the chunk index.
fn chunk_nonce(base: &[u8; NONCE_LEN], index: u64) -> [u8; NONCE_LEN] {
    let mut nonce = *base;
    for (byte, idx) in nonce.iter_mut().zip(index.to_le_bytes()) {
        *byte ^= idx;
    }
    nonce
}

/// AAD: prefix | chunk_index(8 LE) | is_final(1)
fn chunk_aad(index: u64, is_final: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_PREFIX.len() + 9);
    aad.extend_from_slice(AAD_PREFIX);
    aad.extend_from_slice(&index.to_le_bytes());
    aad.push(u8::from(is_final));
    aad
}

/// Encrypt `plaintext` in `chunk_size`-byte chunks.
///
/// With no key a fresh one is generated; passing the key recovered from an
/// existing share link keeps the link stable across republishes.
pub fn encrypt(
    plaintext: &str,
    key: Option<DecryptionKey>,
    chunk_size: usize,
) -> Result<EncryptionEnvelope> {
    if chunk_size == 0 {
        return Err(PublishError::Encryption("Chunk size must be non-zero".into()));
    }

    let key = key.unwrap_or_else(aead::generate_key);
    let base_nonce = aead::generate_nonce();

    let bytes = plaintext.as_bytes();
    let mut chunks: Vec<&[u8]> = bytes.chunks(chunk_size).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }
    let total = chunks.len();

    let ciphertext = chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let index = i as u64;
            let aad = chunk_aad(index, i == total - 1);
            let encrypted =
                aead::encrypt_with_nonce(&key, &chunk_nonce(&base_nonce, index), chunk, &aad)?;
            Ok(STANDARD.encode(encrypted))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EncryptionEnvelope {
        payload: EncryptedPayload {
            ciphertext,
            nonce: STANDARD.encode(base_nonce),
        },
        key,
    })
}

/// Decrypt every chunk with the nonce derived from its position and
/// concatenate in order. Any authentication failure fails the whole call;
/// partial plaintext is never returned.
pub fn decrypt(payload: &EncryptedPayload, key: &DecryptionKey) -> Result<String> {
    if payload.ciphertext.is_empty() {
        return Err(PublishError::Decryption("No ciphertext chunks".into()));
    }

    let nonce_bytes = STANDARD
        .decode(&payload.nonce)
        .map_err(|e| PublishError::Decryption(format!("Malformed nonce: {e}")))?;
    let base_nonce: [u8; NONCE_LEN] = nonce_bytes
        .as_slice()
        .try_into()
        .map_err(|_| PublishError::Decryption("Nonce has the wrong length".into()))?;

    let total = payload.ciphertext.len();
    let mut plaintext = Vec::new();

    for (i, chunk) in payload.ciphertext.iter().enumerate() {
        let encrypted = STANDARD
            .decode(chunk)
            .map_err(|e| PublishError::Decryption(format!("Malformed chunk {i}: {e}")))?;
        let index = i as u64;
        let decrypted = aead::decrypt(
            key,
            &chunk_nonce(&base_nonce, index),
            &encrypted,
            &chunk_aad(index, i == total - 1),
        )?;
        plaintext.extend_from_slice(&decrypted);
    }

    String::from_utf8(plaintext)
        .map_err(|_| PublishError::Decryption("Plaintext is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_single_chunk() {
        let envelope = encrypt("small note", None, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(envelope.payload.ciphertext.len(), 1);
        assert_eq!(decrypt(&envelope.payload, &envelope.key).unwrap(), "small note");
    }

    #[test]
    fn test_quick_brown_fox_chunks() {
        let text = "The quick brown fox";
        let envelope = encrypt(text, None, 5).unwrap();
        assert_eq!(envelope.payload.ciphertext.len(), 4);
        assert_eq!(decrypt(&envelope.payload, &envelope.key).unwrap(), text);

        let mut reordered = envelope.payload.clone();
        reordered.ciphertext.swap(1, 2);
        assert!(matches!(
            decrypt(&reordered, &envelope.key),
            Err(PublishError::Decryption(_))
        ));
    }

    #[test]
    fn test_truncation_and_duplication_fail() {
        let envelope = encrypt("The quick brown fox", None, 5).unwrap();

        let mut truncated = envelope.payload.clone();
        truncated.ciphertext.pop();
        assert!(decrypt(&truncated, &envelope.key).is_err());

        let mut duplicated = envelope.payload.clone();
        let first = duplicated.ciphertext[0].clone();
        duplicated.ciphertext.insert(1, first);
        assert!(decrypt(&duplicated, &envelope.key).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = encrypt("secret note", None, 4).unwrap();
        let result = decrypt(&envelope.payload, &DecryptionKey::generate());
        assert!(matches!(result, Err(PublishError::Decryption(_))));
    }

    #[test]
    fn test_multibyte_text_split_mid_character() {
        let text = "héllo wörld ✓ ünïcode";
        let envelope = encrypt(text, None, 3).unwrap();
        assert_eq!(decrypt(&envelope.payload, &envelope.key).unwrap(), text);
    }

    #[test]
    fn test_empty_plaintext() {
        let envelope = encrypt("", None, 16).unwrap();
        assert_eq!(envelope.payload.ciphertext.len(), 1);
        assert_eq!(decrypt(&envelope.payload, &envelope.key).unwrap(), "");
    }

    #[test]
    fn test_supplied_key_is_reused_with_fresh_nonce() {
        let key = DecryptionKey::generate();
        let first = encrypt("version one", Some(key.clone()), 4).unwrap();
        let second = encrypt("version one", Some(key.clone()), 4).unwrap();

        assert_eq!(first.key, key);
        assert_eq!(second.key_string(), key.encode());
        assert_ne!(first.payload.nonce, second.payload.nonce);
        assert_ne!(first.payload.ciphertext, second.payload.ciphertext);
        assert_eq!(decrypt(&second.payload, &key).unwrap(), "version one");
    }

    #[test]
    fn test_fresh_keys_give_unrelated_ciphertext() {
        let a = encrypt("same text", None, 64).unwrap();
        let b = encrypt("same text", None, 64).unwrap();
        assert_ne!(a.key, b.key);
        assert_ne!(a.payload.ciphertext, b.payload.ciphertext);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            encrypt("x", None, 0),
            Err(PublishError::Encryption(_))
        ));
    }
}

/// XChaCha20-Poly1305 AEAD primitive used for note payload chunks.
///
/// The 24-byte nonce is large enough that a random per-call base nonce
/// never realistically collides, even when one key is reused across many
/// republishes of the same note.
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::crypto::sensitive::DecryptionKey;
use crate::error::{PublishError, Result};

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Generate a random 256-bit symmetric key.
pub fn generate_key() -> DecryptionKey {
    DecryptionKey::generate()
}

/// Generate a random 24-byte nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

fn cipher(key: &DecryptionKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Encrypt with a caller-chosen nonce. Returns ciphertext with the tag appended.
pub fn encrypt_with_nonce(
    key: &DecryptionKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    cipher(key)
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| PublishError::Encryption(e.to_string()))
}

/// Decrypt and authenticate one ciphertext.
pub fn decrypt(
    key: &DecryptionKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    cipher(key)
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| PublishError::Decryption("Cannot decrypt ciphertext with this key.".into()))
}

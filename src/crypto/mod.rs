/// Cryptographic building blocks: content addressing and chunked AEAD.
pub mod aead;
pub mod hash;
pub mod sensitive;
pub mod streaming;

pub use hash::{addressable_filename, digest, ContentDigest};
pub use sensitive::{ApiSecret, DecryptionKey};
pub use streaming::{decrypt, encrypt, EncryptedPayload, EncryptionEnvelope};

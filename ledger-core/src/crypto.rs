//! Hashing for replay detection
//!
//! Entry-sets are fingerprinted with SHA-256 over their bincode canonical bytes so a
//! replayed reference can be told apart from a reference reused with other content.

use sha2::{Digest, Sha256};

/// 32-byte SHA-256 digest
pub type Fingerprint = [u8; 32];

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a serializable value through its canonical bincode encoding
pub fn hash_canonical<T: serde::Serialize>(value: &T) -> crate::Result<Fingerprint> {
    let bytes = bincode::serialize(value)?;
    Ok(hash_bytes(&bytes))
}

//! Payload hashing for the acknowledgement modules.
//!
//! The acknowledgement modules key their retransmission state by a
//! cryptographic digest of the original user payload rather than by the
//! payload bytes themselves, so the pending map stays a fixed-size key
//! regardless of message size.

use sha1::{Digest, Sha1};

/// SHA-1 digest of `data` (20 bytes). Collisions are treated as a match —
/// see the acknowledgement modules' error handling notes.
pub fn hash_payload(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

//! Domain-separated SHA-256 hashing
//!
//! Every signed payload in the circle protocol is hashed through
//! [`tagged_hash`] with one of the [`domains`] labels, so a signature produced
//! for one purpose (say a peer's application) can never be replayed as a
//! signature for another (a circle generation).
//!
//! Current algorithm: **SHA-256** (32-byte output).

use sha2::{Digest, Sha256};

/// Length of every digest produced by this module.
pub const DIGEST_LEN: usize = 32;

/// Well-known domain separation labels.
pub mod domains {
    /// Generation signature and concordance signatures over a circle.
    pub const CIRCLE_GENERATION: &str = "concord.circle.generation.v1";
    /// User-key endorsement of a peer's application.
    pub const PEER_APPLICATION: &str = "concord.peer.application.v1";
    /// A peer's self-signature over its descriptive record.
    pub const PEER_INFO: &str = "concord.peer.info.v1";
    /// Derivation of a stable peer identifier from its signing key.
    pub const PEER_ID: &str = "concord.peer.id.v1";
}

/// Hash `parts` under a domain label.
///
/// Layout: `len(domain) || domain || (len(part) || part)*`, lengths as
/// 4-byte big endian, so part boundaries cannot be shifted.
pub fn tagged_hash(domain: &str, parts: &[&[u8]]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update((domain.len() as u32).to_be_bytes());
    hasher.update(domain.as_bytes());
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    let mut output = [0u8; DIGEST_LEN];
    output.copy_from_slice(&hasher.finalize());
    output
}

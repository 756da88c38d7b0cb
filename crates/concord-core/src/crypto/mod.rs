//! Cryptographic primitives for circle signatures
//!
//! Ed25519 for every signature in the protocol and domain-separated
//! SHA-256 for the payloads they cover.

/// Ed25519 keys, signing and verification
pub mod ed25519;
/// Domain-separated SHA-256
pub mod hash;

// Ed25519 types and operations
pub use ed25519::{
    ed25519_sign, ed25519_verify, generate_signing_key, keys_equal, signing_key_from_seed,
    Ed25519Signature, Ed25519SigningKey, Ed25519VerifyingKey,
};

// Hashing
pub use hash::{domains, tagged_hash, DIGEST_LEN};

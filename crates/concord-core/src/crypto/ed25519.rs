//! Ed25519 types and operations
//!
//! Thin helpers over `ed25519-dalek` shared by user keys and peer keys.

use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

/// Ed25519 signing key (private)
pub type Ed25519SigningKey = ed25519_dalek::SigningKey;
/// Ed25519 verifying key (public)
pub type Ed25519VerifyingKey = ed25519_dalek::VerifyingKey;
/// Ed25519 signature
pub type Ed25519Signature = ed25519_dalek::Signature;

/// Generate a fresh signing key from the operating system RNG.
pub fn generate_signing_key() -> Ed25519SigningKey {
    Ed25519SigningKey::generate(&mut OsRng)
}

/// Build a signing key from a 32-byte seed.
pub fn signing_key_from_seed(seed: &[u8; 32]) -> Ed25519SigningKey {
    Ed25519SigningKey::from_bytes(seed)
}

/// Sign a digest.
pub fn ed25519_sign(key: &Ed25519SigningKey, message: &[u8]) -> Ed25519Signature {
    use ed25519_dalek::Signer;
    key.sign(message)
}

/// Verify a signature using strict verification (rejects malleable encodings).
pub fn ed25519_verify(
    message: &[u8],
    signature: &Ed25519Signature,
    key: &Ed25519VerifyingKey,
) -> bool {
    key.verify_strict(message, signature).is_ok()
}

/// Constant-time equality of two public keys.
pub fn keys_equal(a: &Ed25519VerifyingKey, b: &Ed25519VerifyingKey) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let key = generate_signing_key();
        let sig = ed25519_sign(&key, b"circle");
        assert!(ed25519_verify(b"circle", &sig, &key.verifying_key()));
        assert!(!ed25519_verify(b"other", &sig, &key.verifying_key()));
    }

    #[test]
    fn test_seeded_keys_are_deterministic() {
        let a = signing_key_from_seed(&[7u8; 32]);
        let b = signing_key_from_seed(&[7u8; 32]);
        assert!(keys_equal(&a.verifying_key(), &b.verifying_key()));
        let c = signing_key_from_seed(&[8u8; 32]);
        assert!(!keys_equal(&a.verifying_key(), &c.verifying_key()));
    }
}

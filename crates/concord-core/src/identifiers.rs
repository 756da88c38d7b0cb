//! Core identifier types
//!
//! Peers are named by a UUID derived from their signing key, so the
//! identifier is stable for the life of the key and never needs to be
//! allocated by a coordinator. Circles are named by the protection domain
//! they sync.

use crate::crypto::{domains, tagged_hash, Ed25519VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a peer within the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Derive the identifier for a peer signing key.
    pub fn from_signing_key(key: &Ed25519VerifyingKey) -> Self {
        let digest = tagged_hash(domains::PEER_ID, &[key.as_bytes()]);
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&digest[..16]);
        Self(Uuid::from_bytes(uuid_bytes))
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("peer-").unwrap_or(s);
        Ok(Self(Uuid::parse_str(raw)?))
    }
}

/// Name of a circle; one circle exists per synced protection domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircleName(String);

impl CircleName {
    /// Create a circle name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CircleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CircleName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CircleName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing_key_from_seed;

    #[test]
    fn test_peer_id_is_stable_for_key() {
        let key = signing_key_from_seed(&[1u8; 32]).verifying_key();
        assert_eq!(PeerId::from_signing_key(&key), PeerId::from_signing_key(&key));
    }

    #[test]
    fn test_peer_id_differs_across_keys() {
        let a = signing_key_from_seed(&[1u8; 32]).verifying_key();
        let b = signing_key_from_seed(&[2u8; 32]).verifying_key();
        assert_ne!(PeerId::from_signing_key(&a), PeerId::from_signing_key(&b));
    }

    #[test]
    fn test_peer_id_display_parse() {
        let key = signing_key_from_seed(&[3u8; 32]).verifying_key();
        let id = PeerId::from_signing_key(&key);
        let parsed: PeerId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}

//! Peer identities
//!
//! A [`PeerIdentity`] is the public record a device publishes into a circle.
//! It is self-signed by the peer's signing key and, once the device applies
//! for membership, endorsed by the account's user key (the application
//! signature). A [`FullPeerIdentity`] adds the private signing key and is
//! held only by the device it describes.
//!
//! Departing peers are not deleted: [`FullPeerIdentity::promote_to_retirement`]
//! turns the record into a tombstone that keeps the peer ID and can never
//! apply again, so other members can notice the departure and clean up.

use crate::codec::canonical_bytes;
use crate::extensions::PeerExtensions;
use concord_core::crypto::{
    domains, ed25519_sign, ed25519_verify, generate_signing_key, tagged_hash,
};
use concord_core::{
    CircleName, ConcordError, Ed25519Signature, Ed25519SigningKey, Ed25519VerifyingKey, PeerId,
    Result,
};
use serde::{Deserialize, Serialize};

/// Descriptive device metadata; not trust relevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gestalt {
    /// User-visible device name
    pub device_name: String,
    /// Operating system version string
    pub os_version: String,
    /// Hardware model
    pub model: String,
}

impl Gestalt {
    /// Gestalt with just a device name
    pub fn named(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Self::default()
        }
    }
}

/// What kind of principal a peer record stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerKind {
    /// A physical device
    Device,
    /// Synthetic identity held by the account backend rather than a device
    CloudIdentity,
}

impl PeerKind {
    fn tag(self) -> u8 {
        match self {
            PeerKind::Device => 0,
            PeerKind::CloudIdentity => 1,
        }
    }
}

/// Public peer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    peer_id: PeerId,
    signing_key: Ed25519VerifyingKey,
    kind: PeerKind,
    gestalt: Gestalt,
    extensions: PeerExtensions,
    /// Unix seconds at which the peer retired
    retired_at: Option<u64>,
    application_signature: Option<Ed25519Signature>,
    self_signature: Ed25519Signature,
}

impl PeerIdentity {
    /// Stable peer identifier
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Public signing key of the peer
    pub fn signing_key(&self) -> &Ed25519VerifyingKey {
        &self.signing_key
    }

    /// Kind of principal
    pub fn kind(&self) -> PeerKind {
        self.kind
    }

    /// Whether this is the synthetic cloud identity
    pub fn is_cloud_identity(&self) -> bool {
        self.kind == PeerKind::CloudIdentity
    }

    /// Descriptive metadata
    pub fn gestalt(&self) -> &Gestalt {
        &self.gestalt
    }

    /// Extension attributes
    pub fn extensions(&self) -> &PeerExtensions {
        &self.extensions
    }

    /// Whether this record is a retirement tombstone
    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    /// Retirement time, if retired
    pub fn retired_at(&self) -> Option<u64> {
        self.retired_at
    }

    /// Whether the record carries an application signature at all
    pub fn has_application_signature(&self) -> bool {
        self.application_signature.is_some()
    }

    /// Digest endorsed by the user key when the peer applies.
    fn application_digest(&self, user_key: &Ed25519VerifyingKey) -> [u8; 32] {
        tagged_hash(
            domains::PEER_APPLICATION,
            &[
                self.peer_id.0.as_bytes(),
                self.signing_key.as_bytes(),
                user_key.as_bytes(),
            ],
        )
    }

    /// Digest of the descriptive content covered by the self-signature.
    fn info_digest(&self) -> [u8; 32] {
        let retired = self.retired_at.map(u64::to_be_bytes).unwrap_or_default();
        let gestalt = canonical_bytes(&self.gestalt);
        let extensions = canonical_bytes(&self.extensions);
        tagged_hash(
            domains::PEER_INFO,
            &[
                self.peer_id.0.as_bytes(),
                self.signing_key.as_bytes(),
                &[self.kind.tag(), u8::from(self.retired_at.is_some())],
                &retired,
                gestalt.as_slice(),
                extensions.as_slice(),
            ],
        )
    }

    /// Re-validate the application signature against a user public key.
    pub fn verify_application(&self, user_key: &Ed25519VerifyingKey) -> bool {
        match &self.application_signature {
            Some(signature) => {
                ed25519_verify(&self.application_digest(user_key), signature, user_key)
            }
            None => false,
        }
    }

    /// Check the self-signature and that the ID matches the signing key.
    pub fn verify_self(&self) -> bool {
        PeerId::from_signing_key(&self.signing_key) == self.peer_id
            && ed25519_verify(&self.info_digest(), &self.self_signature, &self.signing_key)
    }

    /// Copy of this record endorsed by `user_key`.
    ///
    /// Anyone holding the user private key may endorse a record; the
    /// endorsement does not touch the self-signature.
    pub fn endorse(&self, user_key: &Ed25519SigningKey) -> PeerIdentity {
        let mut endorsed = self.clone();
        let digest = endorsed.application_digest(&user_key.verifying_key());
        endorsed.application_signature = Some(ed25519_sign(user_key, &digest));
        endorsed
    }
}

/// Peer record plus its private signing key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullPeerIdentity {
    peer: PeerIdentity,
    signing_key: Ed25519SigningKey,
}

impl std::fmt::Debug for FullPeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullPeerIdentity")
            .field("peer", &self.peer)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

impl FullPeerIdentity {
    /// Build a self-signed identity for an existing signing key.
    pub fn from_signing_key(
        signing_key: Ed25519SigningKey,
        kind: PeerKind,
        gestalt: Gestalt,
        extensions: PeerExtensions,
    ) -> Self {
        let verifying = signing_key.verifying_key();
        let peer = PeerIdentity {
            peer_id: PeerId::from_signing_key(&verifying),
            signing_key: verifying,
            kind,
            gestalt,
            extensions,
            retired_at: None,
            application_signature: None,
            // Placeholder, replaced by resign() below
            self_signature: ed25519_sign(&signing_key, b""),
        };
        let mut full = Self { peer, signing_key };
        full.resign();
        full
    }

    /// Fresh identity with a newly generated signing key.
    pub fn generate(kind: PeerKind, gestalt: Gestalt) -> Self {
        Self::from_signing_key(
            generate_signing_key(),
            kind,
            gestalt,
            PeerExtensions::default(),
        )
    }

    /// Build a new identity and its application endorsed by the user key.
    pub fn create_application(
        user_key: &Ed25519SigningKey,
        signing_key: Ed25519SigningKey,
        kind: PeerKind,
        gestalt: Gestalt,
    ) -> Self {
        let mut full =
            Self::from_signing_key(signing_key, kind, gestalt, PeerExtensions::default());
        full.refresh_application(user_key);
        full
    }

    /// Re-endorse the record under a (possibly new) user key.
    pub fn refresh_application(&mut self, user_key: &Ed25519SigningKey) {
        self.peer = self.peer.endorse(user_key);
    }

    /// Public record
    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Stable peer identifier
    pub fn peer_id(&self) -> PeerId {
        self.peer.peer_id
    }

    /// Sign arbitrary bytes with the peer key.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        ed25519_sign(&self.signing_key, message)
    }

    /// Replace the gestalt and re-sign. Returns whether anything changed.
    pub fn update_gestalt(&mut self, gestalt: Gestalt) -> bool {
        if self.peer.gestalt == gestalt {
            return false;
        }
        self.peer.gestalt = gestalt;
        self.resign();
        true
    }

    /// Replace the extension attributes and re-sign. Returns whether anything changed.
    pub fn update_extensions(&mut self, extensions: PeerExtensions) -> bool {
        if self.peer.extensions == extensions {
            return false;
        }
        self.peer.extensions = extensions;
        self.resign();
        true
    }

    /// Turn the record into a retirement tombstone.
    ///
    /// Idempotent: a record that is already retired is returned unchanged,
    /// keeping its original retirement time.
    pub fn promote_to_retirement(&mut self, now: u64) -> PeerIdentity {
        if !self.peer.is_retired() {
            self.peer.retired_at = Some(now);
            self.resign();
        }
        self.peer.clone()
    }

    fn resign(&mut self) {
        let digest = self.peer.info_digest();
        self.peer.self_signature = ed25519_sign(&self.signing_key, &digest);
    }
}

/// Locally held record of a retirement this device published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetirementTicket {
    /// Circle the peer retired from
    pub circle: CircleName,
    /// Retired peer tombstone
    pub peer: PeerIdentity,
    /// Unix seconds the ticket was created
    pub created_at: u64,
}

impl RetirementTicket {
    /// Create a ticket for a retired record.
    pub fn new(circle: CircleName, peer: PeerIdentity, created_at: u64) -> Result<Self> {
        if !peer.is_retired() {
            return Err(ConcordError::unexpected_type(format!(
                "retirement ticket for active {}",
                peer.peer_id()
            )));
        }
        Ok(Self {
            circle,
            peer,
            created_at,
        })
    }

    /// Peer the ticket is about
    pub fn peer_id(&self) -> PeerId {
        self.peer.peer_id()
    }

    /// Whether the ticket may be garbage collected.
    ///
    /// A peer still observed active in the circle keeps its ticket regardless
    /// of age; otherwise the ticket expires `threshold_secs` after creation.
    pub fn is_expired(&self, threshold_secs: u64, now: u64, still_active: bool) -> bool {
        if still_active {
            return false;
        }
        now.saturating_sub(self.created_at) >= threshold_secs
    }

    /// Encode for the transport.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ConcordError::serialization(e.to_string()))
    }

    /// Decode a ticket received from the transport.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let ticket: Self =
            bincode::deserialize(bytes).map_err(|e| ConcordError::unexpected_type(e.to_string()))?;
        if !ticket.peer.is_retired() || !ticket.peer.verify_self() {
            return Err(ConcordError::unexpected_type(format!(
                "invalid retirement record for {}",
                ticket.peer.peer_id()
            )));
        }
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::crypto::signing_key_from_seed;

    fn user_key(seed: u8) -> Ed25519SigningKey {
        signing_key_from_seed(&[seed; 32])
    }

    fn device(seed: u8) -> FullPeerIdentity {
        FullPeerIdentity::create_application(
            &user_key(1),
            signing_key_from_seed(&[seed; 32]),
            PeerKind::Device,
            Gestalt::named(format!("device-{seed}")),
        )
    }

    #[test]
    fn test_application_verifies_under_endorsing_key_only() {
        let full = device(10);
        assert!(full.peer().verify_application(&user_key(1).verifying_key()));
        assert!(!full.peer().verify_application(&user_key(2).verifying_key()));
    }

    #[test]
    fn test_self_signature_tracks_updates() {
        let mut full = device(11);
        assert!(full.peer().verify_self());
        assert!(full.update_gestalt(Gestalt::named("renamed")));
        assert!(full.peer().verify_self());
        assert!(!full.update_gestalt(Gestalt::named("renamed")));
    }

    #[test]
    fn test_tampered_record_fails_self_check() {
        let full = device(12);
        let mut tampered = full.peer().clone();
        tampered.gestalt = Gestalt::named("forged");
        assert!(!tampered.verify_self());
    }

    #[test]
    fn test_retirement_is_idempotent() {
        let mut full = device(13);
        let first = full.promote_to_retirement(1_000);
        let second = full.promote_to_retirement(2_000);
        assert_eq!(first, second);
        assert_eq!(second.retired_at(), Some(1_000));
        assert!(second.verify_self());
    }

    #[test]
    fn test_ticket_expiry_respects_activity() {
        let mut full = device(14);
        let tombstone = full.promote_to_retirement(100);
        let ticket = RetirementTicket::new("default".into(), tombstone, 100).unwrap();
        assert!(!ticket.is_expired(50, 120, false));
        assert!(ticket.is_expired(50, 150, false));
        assert!(!ticket.is_expired(50, 10_000, true));
    }

    #[test]
    fn test_ticket_rejects_active_peer() {
        let full = device(15);
        assert!(RetirementTicket::new("default".into(), full.peer().clone(), 0).is_err());
    }

    #[test]
    fn test_ticket_wire_roundtrip_checks_signature() {
        let mut full = device(16);
        let ticket =
            RetirementTicket::new("default".into(), full.promote_to_retirement(5), 5).unwrap();
        let decoded = RetirementTicket::decode(&ticket.encode().unwrap()).unwrap();
        assert_eq!(decoded, ticket);
    }
}

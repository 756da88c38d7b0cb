//! Circle value type
//!
//! A [`Circle`] is an immutable-by-convention value: every operation takes
//! `&self` and returns a new circle (or an error), leaving the original
//! untouched. The account engine holds the installed value and replaces it
//! wholesale, so there is no in-place mutation to coordinate.
//!
//! ## Signed content
//!
//! The generation signature and every concordance signature cover the same
//! digest: circle name, generation, the `(peer id, signing key)` of each
//! entry in `peers`, and the ids of `retirees`. Applicants and rejected
//! applicants are deliberately outside the digest, so admitting an
//! application or rejecting it never invalidates existing signatures.
//! Retiring a peer in place (replacing its record with a tombstone) also
//! leaves the digest unchanged; moving the tombstone to `retirees` does not.

use crate::peer::{FullPeerIdentity, PeerIdentity};
use concord_core::crypto::{domains, ed25519_sign, ed25519_verify, tagged_hash};
use concord_core::{
    CircleName, ConcordError, Ed25519Signature, Ed25519SigningKey, Ed25519VerifyingKey, PeerId,
    Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Version tag written in front of every encoded circle.
pub const CIRCLE_ENCODING_VERSION: u16 = 1;

/// Signed, versioned membership set for one protection domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circle {
    name: CircleName,
    generation: u64,
    /// Admitted peers; may contain retirement tombstones not yet finalized
    peers: BTreeMap<PeerId, PeerIdentity>,
    applicants: BTreeMap<PeerId, PeerIdentity>,
    rejected_applicants: BTreeMap<PeerId, PeerIdentity>,
    retirees: BTreeMap<PeerId, PeerIdentity>,
    generation_signature: Option<Ed25519Signature>,
    peer_signatures: BTreeMap<PeerId, Ed25519Signature>,
}

#[derive(Serialize, Deserialize)]
struct CircleEnvelope {
    version: u16,
    circle: Circle,
}

impl Circle {
    /// Empty ("absent") circle at generation zero.
    pub fn new(name: CircleName) -> Self {
        Self {
            name,
            generation: 0,
            peers: BTreeMap::new(),
            applicants: BTreeMap::new(),
            rejected_applicants: BTreeMap::new(),
            retirees: BTreeMap::new(),
            generation_signature: None,
            peer_signatures: BTreeMap::new(),
        }
    }

    // ---- queries -------------------------------------------------------

    /// Circle name
    pub fn name(&self) -> &CircleName {
        &self.name
    }

    /// Generation counter
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A circle with no peers and no applicants is semantically absent.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty() && self.applicants.is_empty()
    }

    /// All admitted peer records, tombstones included
    pub fn peers(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.peers.values()
    }

    /// Admitted peers that have not retired
    pub fn active_peers(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.peers.values().filter(|p| !p.is_retired())
    }

    /// Pending applications
    pub fn applicants(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.applicants.values()
    }

    /// Rejected applications
    pub fn rejected_applicants(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.rejected_applicants.values()
    }

    /// Finalized retirement tombstones
    pub fn retirees(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.retirees.values()
    }

    /// Number of admitted peer records, tombstones included
    pub fn count_peers(&self) -> usize {
        self.peers.len()
    }

    /// Number of admitted peers that have not retired
    pub fn count_active_peers(&self) -> usize {
        self.active_peers().count()
    }

    /// Number of pending applications
    pub fn count_applicants(&self) -> usize {
        self.applicants.len()
    }

    /// Admitted peer record by id
    pub fn peer(&self, id: &PeerId) -> Option<&PeerIdentity> {
        self.peers.get(id)
    }

    /// Pending application by id
    pub fn applicant(&self, id: &PeerId) -> Option<&PeerIdentity> {
        self.applicants.get(id)
    }

    /// Whether `id` is in `peers` (retired in place or not)
    pub fn has_peer(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Whether `id` is an admitted, non-retired peer
    pub fn has_active_peer(&self, id: &PeerId) -> bool {
        self.peers.get(id).is_some_and(|p| !p.is_retired())
    }

    /// Whether `id` has a pending application
    pub fn has_applicant(&self, id: &PeerId) -> bool {
        self.applicants.contains_key(id)
    }

    /// Whether `id` was rejected
    pub fn has_rejected_applicant(&self, id: &PeerId) -> bool {
        self.rejected_applicants.contains_key(id)
    }

    /// Whether `id` is a finalized retiree
    pub fn has_retiree(&self, id: &PeerId) -> bool {
        self.retirees.contains_key(id)
    }

    /// Whether any tombstone is still waiting in `peers` to be finalized
    pub fn has_retired_in_place(&self) -> bool {
        self.peers.values().any(PeerIdentity::is_retired)
    }

    /// Whether a generation signature is present at all
    pub fn is_generation_signed(&self) -> bool {
        self.generation_signature.is_some()
    }

    /// Whether `id` has left a concordance signature (valid or not)
    pub fn has_peer_signature(&self, id: &PeerId) -> bool {
        self.peer_signatures.contains_key(id)
    }

    // ---- signatures ----------------------------------------------------

    fn generation_digest(&self) -> [u8; 32] {
        let mut members = Vec::with_capacity(self.peers.len() * 48);
        for (id, peer) in &self.peers {
            members.extend_from_slice(id.0.as_bytes());
            members.extend_from_slice(peer.signing_key().as_bytes());
        }
        let mut retired = Vec::with_capacity(self.retirees.len() * 16);
        for id in self.retirees.keys() {
            retired.extend_from_slice(id.0.as_bytes());
        }
        let generation = self.generation.to_be_bytes();
        tagged_hash(
            domains::CIRCLE_GENERATION,
            &[
                self.name.as_str().as_bytes(),
                generation.as_slice(),
                members.as_slice(),
                retired.as_slice(),
            ],
        )
    }

    /// Check the generation signature against a user public key.
    pub fn verify(&self, user_key: &Ed25519VerifyingKey) -> bool {
        match &self.generation_signature {
            Some(signature) => ed25519_verify(&self.generation_digest(), signature, user_key),
            None => false,
        }
    }

    /// Check `peer`'s concordance signature over the current contents.
    pub fn verify_peer_signed(&self, peer: &PeerIdentity) -> bool {
        match self.peer_signatures.get(&peer.peer_id()) {
            Some(signature) => {
                ed25519_verify(&self.generation_digest(), signature, peer.signing_key())
            }
            None => false,
        }
    }

    fn require_active_signer(&self, signer: &FullPeerIdentity) -> Result<()> {
        if self.has_active_peer(&signer.peer_id()) {
            Ok(())
        } else {
            Err(ConcordError::peer_not_found(format!(
                "{} is not an active peer of {}",
                signer.peer_id(),
                self.name
            )))
        }
    }

    /// Stamp a fresh generation signature.
    ///
    /// Existing concordance signatures are dropped and the signer's own is
    /// added, so the result always carries exactly one peer signature.
    pub fn generation_sign(
        &self,
        user_key: &Ed25519SigningKey,
        signer: &FullPeerIdentity,
    ) -> Result<Circle> {
        self.require_active_signer(signer)?;
        let mut next = self.clone();
        next.peer_signatures.clear();
        next.generation_signature = Some(ed25519_sign(user_key, &next.generation_digest()));
        next.concordance_sign(signer)
    }

    /// Add or refresh the signer's concordance signature.
    pub fn concordance_sign(&self, signer: &FullPeerIdentity) -> Result<Circle> {
        self.require_active_signer(signer)?;
        let mut next = self.clone();
        let signature = signer.sign(&next.generation_digest());
        next.peer_signatures.insert(signer.peer_id(), signature);
        Ok(next)
    }

    // ---- membership transitions ---------------------------------------

    /// Restart membership with `founder` as the sole peer.
    ///
    /// The generation continues from the current value, so a reset circle
    /// always supersedes what it replaces.
    pub fn reset_to_offering(
        &self,
        user_key: &Ed25519SigningKey,
        founder: &FullPeerIdentity,
    ) -> Result<Circle> {
        self.reset_with_founders(user_key, founder, &[])
    }

    /// Like [`Circle::reset_to_offering`], also admitting extra identities
    /// (the cloud identity) in the same generation.
    pub fn reset_with_founders(
        &self,
        user_key: &Ed25519SigningKey,
        founder: &FullPeerIdentity,
        companions: &[&PeerIdentity],
    ) -> Result<Circle> {
        let user_public = user_key.verifying_key();
        let mut next = self.reset_to_empty();
        for peer in std::iter::once(founder.peer()).chain(companions.iter().copied()) {
            check_application(peer, &user_public)?;
            next.peers.insert(peer.peer_id(), peer.clone());
        }
        next.generation_sign(user_key, founder)
    }

    /// Clear all membership, keeping the name and advancing the generation.
    pub fn reset_to_empty(&self) -> Circle {
        let mut next = Circle::new(self.name.clone());
        next.generation = self.generation.saturating_add(1);
        next
    }

    /// Add an application if it verifies under `user_key`.
    ///
    /// Re-applying replaces the pending record and clears an earlier
    /// rejection. A peer that is already admitted is left as it is.
    pub fn request_admission(
        &self,
        user_key: &Ed25519VerifyingKey,
        applicant: &PeerIdentity,
    ) -> Result<Circle> {
        let id = applicant.peer_id();
        if applicant.is_retired() || self.has_retiree(&id) {
            return Err(ConcordError::bad_application_signature(format!(
                "{id} is retired and cannot apply to {}",
                self.name
            )));
        }
        check_application(applicant, user_key)?;
        if self.has_peer(&id) {
            return Ok(self.clone());
        }
        let mut next = self.clone();
        next.rejected_applicants.remove(&id);
        next.applicants.insert(id, applicant.clone());
        Ok(next)
    }

    /// Admit a pending applicant, bump the generation and re-sign.
    pub fn accept_applicant(
        &self,
        user_key: &Ed25519SigningKey,
        approver: &FullPeerIdentity,
        applicant: &PeerId,
    ) -> Result<Circle> {
        self.require_active_signer(approver)?;
        let record = self.applicants.get(applicant).ok_or_else(|| {
            ConcordError::peer_not_found(format!("{applicant} is not applying to {}", self.name))
        })?;
        if record.is_retired() {
            return Err(ConcordError::bad_application_signature(format!(
                "{applicant} retired while applying to {}",
                self.name
            )));
        }
        check_application(record, &user_key.verifying_key())?;

        let mut next = self.clone();
        if let Some(record) = next.applicants.remove(applicant) {
            next.peers.insert(*applicant, record);
        }
        next.generation = next.generation.saturating_add(1);
        next.generation_sign(user_key, approver)
    }

    /// Move a pending applicant to the rejected set.
    pub fn reject_applicant(
        &self,
        approver: &FullPeerIdentity,
        applicant: &PeerId,
    ) -> Result<Circle> {
        self.require_active_signer(approver)?;
        let mut next = self.clone();
        let record = next.applicants.remove(applicant).ok_or_else(|| {
            ConcordError::peer_not_found(format!("{applicant} is not applying to {}", self.name))
        })?;
        next.rejected_applicants.insert(*applicant, record);
        Ok(next)
    }

    /// Drop a pending application.
    pub fn withdraw_application(&self, applicant: &PeerId) -> Result<Circle> {
        let mut next = self.clone();
        next.applicants.remove(applicant).ok_or_else(|| {
            ConcordError::peer_not_found(format!("{applicant} is not applying to {}", self.name))
        })?;
        Ok(next)
    }

    /// Forget all rejections, allowing those devices to apply again.
    pub fn clear_rejected_applicants(&self) -> Circle {
        let mut next = self.clone();
        next.rejected_applicants.clear();
        next
    }

    /// Replace an existing peer or applicant record in place.
    ///
    /// The generation is not touched. Retirement is one-way: an active
    /// record never replaces a tombstone. Returns whether anything changed.
    pub fn update_peer_info(&self, peer: &PeerIdentity) -> Result<(Circle, bool)> {
        let id = peer.peer_id();
        if !peer.verify_self() {
            return Err(ConcordError::unexpected_type(format!(
                "self-signature of {id} does not verify"
            )));
        }
        let slot = if self.peers.contains_key(&id) {
            &self.peers
        } else if self.applicants.contains_key(&id) {
            &self.applicants
        } else {
            return Err(ConcordError::peer_not_found(format!(
                "{id} is not in {}",
                self.name
            )));
        };
        let existing = &slot[&id];
        if existing == peer || (existing.is_retired() && !peer.is_retired()) {
            return Ok((self.clone(), false));
        }

        let mut next = self.clone();
        if next.peers.contains_key(&id) {
            next.peers.insert(id, peer.clone());
        } else {
            next.applicants.insert(id, peer.clone());
        }
        Ok((next, true))
    }

    /// Move every in-place tombstone from `peers` to `retirees`.
    ///
    /// Bumps the generation and re-signs when anything moved; otherwise
    /// returns an unchanged copy.
    pub fn finalize_retirement(
        &self,
        user_key: &Ed25519SigningKey,
        signer: &FullPeerIdentity,
    ) -> Result<Circle> {
        if !self.has_retired_in_place() {
            return Ok(self.clone());
        }
        self.require_active_signer(signer)?;
        let mut next = self.clone();
        let retired: Vec<PeerId> = next
            .peers
            .values()
            .filter(|p| p.is_retired())
            .map(PeerIdentity::peer_id)
            .collect();
        for id in retired {
            if let Some(tombstone) = next.peers.remove(&id) {
                next.retirees.insert(id, tombstone);
            }
        }
        next.generation = next.generation.saturating_add(1);
        next.generation_sign(user_key, signer)
    }

    /// Expel a peer outright, bump the generation and re-sign.
    pub fn remove_peer(
        &self,
        user_key: &Ed25519SigningKey,
        signer: &FullPeerIdentity,
        peer: &PeerId,
    ) -> Result<Circle> {
        if *peer == signer.peer_id() {
            return Err(ConcordError::unexpected_type(
                "a peer cannot remove itself; retire instead",
            ));
        }
        self.require_active_signer(signer)?;
        let mut next = self.clone();
        next.peers.remove(peer).ok_or_else(|| {
            ConcordError::peer_not_found(format!("{peer} is not in {}", self.name))
        })?;
        next.generation = next.generation.saturating_add(1);
        next.generation_sign(user_key, signer)
    }

    /// Withdraw every application that no longer verifies under `user_key`.
    pub fn remove_invalid_applications(
        &self,
        user_key: &Ed25519VerifyingKey,
    ) -> (Circle, Vec<PeerId>) {
        let stale: Vec<PeerId> = self
            .applicants
            .values()
            .filter(|a| !a.verify_application(user_key))
            .map(PeerIdentity::peer_id)
            .collect();
        if stale.is_empty() {
            return (self.clone(), stale);
        }
        let mut next = self.clone();
        for id in &stale {
            debug!(circle = %self.name, peer = %id, "withdrawing stale application");
            next.applicants.remove(id);
        }
        (next, stale)
    }

    // ---- encoding ------------------------------------------------------

    /// Serialize for the transport or local storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let envelope = CircleEnvelope {
            version: CIRCLE_ENCODING_VERSION,
            circle: self.clone(),
        };
        bincode::serialize(&envelope).map_err(|e| ConcordError::serialization(e.to_string()))
    }

    /// Parse and structurally validate an encoded circle.
    ///
    /// When `expected` is given the decoded name must match it. Records
    /// whose map key differs from their id or whose self-signature fails
    /// make the whole circle incompatible.
    pub fn decode(bytes: &[u8], expected: Option<&CircleName>) -> Result<Circle> {
        let envelope: CircleEnvelope = bincode::deserialize(bytes)
            .map_err(|e| ConcordError::incompatible_circle(e.to_string()))?;
        if envelope.version != CIRCLE_ENCODING_VERSION {
            return Err(ConcordError::incompatible_circle(format!(
                "unsupported circle encoding version {}",
                envelope.version
            )));
        }
        let circle = envelope.circle;
        if let Some(expected) = expected {
            if circle.name != *expected {
                return Err(ConcordError::name_mismatch(
                    expected.as_str(),
                    circle.name.as_str(),
                ));
            }
        }
        let sets = [
            &circle.peers,
            &circle.applicants,
            &circle.rejected_applicants,
            &circle.retirees,
        ];
        for set in sets {
            for (id, peer) in set {
                if *id != peer.peer_id() || !peer.verify_self() {
                    return Err(ConcordError::incompatible_circle(format!(
                        "invalid peer record {id} in {}",
                        circle.name
                    )));
                }
            }
        }
        Ok(circle)
    }
}

fn check_application(peer: &PeerIdentity, user_key: &Ed25519VerifyingKey) -> Result<()> {
    if !peer.verify_self() {
        return Err(ConcordError::bad_application_signature(format!(
            "self-signature of {} does not verify",
            peer.peer_id()
        )));
    }
    if !peer.verify_application(user_key) {
        return Err(ConcordError::bad_application_signature(format!(
            "application of {} does not verify under the user key",
            peer.peer_id()
        )));
    }
    Ok(())
}

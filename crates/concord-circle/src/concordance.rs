//! Concordance evaluation
//!
//! [`evaluate`] classifies a candidate circle against the locally trusted
//! one. It is a pure function of its inputs; deciding what to do with the
//! verdict is the account engine's job.
//!
//! Checks run in a fixed order and the first that fires wins:
//!
//! 1. no current user key: [`Verdict::NoUserKey`]
//! 2. empty candidate: [`Verdict::Trusted`]
//! 3. no generation signature: [`Verdict::NoUserSignature`]
//! 4. generation signature verifies under neither the current nor the
//!    previous user key: [`Verdict::BadUserSignature`]
//! 5. known circle is newer, verified or not: [`Verdict::GenerationOld`]
//! 6. concordance of the trusted signer set (the known circle's active
//!    peers, or the candidate's own when nothing trusted is known)

use crate::circle::Circle;
use crate::peer::PeerIdentity;
use concord_core::{Ed25519VerifyingKey, PeerId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of comparing a candidate circle with the trusted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// User-signed and concurred by at least one trusted peer
    Trusted,
    /// User-signed but older than the trusted circle
    GenerationOld,
    /// No trusted user key to evaluate against
    NoUserKey,
    /// Generation signature fails under both known user keys
    BadUserSignature,
    /// A trusted peer's concordance signature is present but invalid
    BadPeerSignature,
    /// Candidate carries no generation signature
    NoUserSignature,
    /// No trusted peer has countersigned yet
    NoTrustedPeerSignature,
    /// None of the trusted signers remain active in the candidate
    NoTrustedPeerLeft,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Trusted => "trusted",
            Verdict::GenerationOld => "generation-old",
            Verdict::NoUserKey => "no-user-key",
            Verdict::BadUserSignature => "bad-user-signature",
            Verdict::BadPeerSignature => "bad-peer-signature",
            Verdict::NoUserSignature => "no-user-signature",
            Verdict::NoTrustedPeerSignature => "no-trusted-peer-signature",
            Verdict::NoTrustedPeerLeft => "no-trusted-peer-left",
        };
        f.write_str(s)
    }
}

/// Whether `circle` verifies under either user key.
pub fn verifies_under(
    circle: &Circle,
    previous_key: Option<&Ed25519VerifyingKey>,
    current_key: Option<&Ed25519VerifyingKey>,
) -> bool {
    current_key.is_some_and(|k| circle.verify(k)) || previous_key.is_some_and(|k| circle.verify(k))
}

/// Classify `candidate` against the trusted `known` circle.
///
/// `local_peer` is the evaluating device's own peer id in this circle, if
/// it has one; its missing countersignature never counts against the
/// candidate, and neither does a cloud identity's.
pub fn evaluate(
    known: &Circle,
    candidate: &Circle,
    previous_key: Option<&Ed25519VerifyingKey>,
    current_key: Option<&Ed25519VerifyingKey>,
    local_peer: Option<&PeerId>,
) -> Verdict {
    if current_key.is_none() {
        return Verdict::NoUserKey;
    }
    if candidate.is_empty() {
        return Verdict::Trusted;
    }
    if !candidate.is_generation_signed() {
        return Verdict::NoUserSignature;
    }
    if !verifies_under(candidate, previous_key, current_key) {
        return Verdict::BadUserSignature;
    }

    if !known.is_empty() && candidate.generation() < known.generation() {
        return Verdict::GenerationOld;
    }

    // Signers come from the installed circle only when it is itself trusted.
    let known_trusted = !known.is_empty() && verifies_under(known, previous_key, current_key);
    let signers: Vec<&PeerIdentity> = if known_trusted {
        known.active_peers().collect()
    } else {
        candidate.active_peers().collect()
    };

    signers
        .into_iter()
        .map(|signer| signer_status(candidate, signer, local_peer))
        .fold(Verdict::NoTrustedPeerLeft, stronger)
}

fn signer_status(candidate: &Circle, signer: &PeerIdentity, local_peer: Option<&PeerId>) -> Verdict {
    let id = signer.peer_id();
    let Some(current) = candidate.peer(&id).filter(|p| !p.is_retired()) else {
        return Verdict::NoTrustedPeerLeft;
    };
    if candidate.verify_peer_signed(current) {
        return Verdict::Trusted;
    }
    if candidate.has_peer_signature(&id) {
        return Verdict::BadPeerSignature;
    }
    if local_peer == Some(&id) || current.is_cloud_identity() {
        Verdict::NoTrustedPeerLeft
    } else {
        Verdict::NoTrustedPeerSignature
    }
}

fn rank(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Trusted => 3,
        Verdict::BadPeerSignature => 2,
        Verdict::NoTrustedPeerSignature => 1,
        _ => 0,
    }
}

fn stronger(acc: Verdict, next: Verdict) -> Verdict {
    if rank(next) > rank(acc) {
        next
    } else {
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{FullPeerIdentity, Gestalt, PeerKind};
    use concord_core::crypto::signing_key_from_seed;
    use concord_core::Ed25519SigningKey;

    fn user() -> Ed25519SigningKey {
        signing_key_from_seed(&[7u8; 32])
    }

    fn device(seed: u8) -> FullPeerIdentity {
        FullPeerIdentity::create_application(
            &user(),
            signing_key_from_seed(&[seed; 32]),
            PeerKind::Device,
            Gestalt::default(),
        )
    }

    #[test]
    fn test_stronger_prefers_trust() {
        assert_eq!(
            stronger(Verdict::BadPeerSignature, Verdict::Trusted),
            Verdict::Trusted
        );
        assert_eq!(
            stronger(Verdict::NoTrustedPeerSignature, Verdict::NoTrustedPeerLeft),
            Verdict::NoTrustedPeerSignature
        );
    }

    #[test]
    fn test_missing_user_key_short_circuits() {
        let circle = Circle::new("default".into());
        assert_eq!(
            evaluate(&circle, &circle, None, None, None),
            Verdict::NoUserKey
        );
    }

    #[test]
    fn test_self_founded_circle_is_trusted() {
        let a = device(1);
        let known = Circle::new("default".into());
        let candidate = known.reset_to_offering(&user(), &a).unwrap();
        let key = user().verifying_key();
        assert_eq!(
            evaluate(&known, &candidate, Some(&key), Some(&key), None),
            Verdict::Trusted
        );
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::GenerationOld.to_string(), "generation-old");
    }
}

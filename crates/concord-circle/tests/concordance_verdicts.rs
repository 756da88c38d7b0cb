//! Concordance verdict tests
//!
//! Each verdict is produced in isolation, then in pairs, to pin the order
//! in which the evaluator's checks short-circuit. The last group covers the
//! one-generation user key rollover window.

use concord_circle::{evaluate, Circle, FullPeerIdentity, Gestalt, PeerKind, Verdict};
use concord_core::crypto::signing_key_from_seed;
use concord_core::{Ed25519SigningKey, Ed25519VerifyingKey, PeerId};

/// Three successive user keys: two back, previous, current.
struct Keys {
    oldest: Ed25519SigningKey,
    previous: Ed25519SigningKey,
    current: Ed25519SigningKey,
}

impl Keys {
    fn new() -> Self {
        Self {
            oldest: signing_key_from_seed(&[0x10; 32]),
            previous: signing_key_from_seed(&[0x11; 32]),
            current: signing_key_from_seed(&[0x12; 32]),
        }
    }

    fn previous_pub(&self) -> Ed25519VerifyingKey {
        self.previous.verifying_key()
    }

    fn current_pub(&self) -> Ed25519VerifyingKey {
        self.current.verifying_key()
    }
}

fn device(user: &Ed25519SigningKey, seed: u8) -> FullPeerIdentity {
    FullPeerIdentity::create_application(
        user,
        signing_key_from_seed(&[seed; 32]),
        PeerKind::Device,
        Gestalt::named(format!("device-{seed}")),
    )
}

fn offered(user: &Ed25519SigningKey, founder: &FullPeerIdentity) -> Circle {
    Circle::new("default".into())
        .reset_to_offering(user, founder)
        .unwrap()
}

fn admit(
    circle: &Circle,
    user: &Ed25519SigningKey,
    approver: &FullPeerIdentity,
    applicant: &FullPeerIdentity,
) -> Circle {
    circle
        .request_admission(&user.verifying_key(), applicant.peer())
        .unwrap()
        .accept_applicant(user, approver, &applicant.peer_id())
        .unwrap()
}

/// Flip a byte inside the last concordance signature of the encoding.
///
/// Peer signatures are the final field of an encoded circle, so the last
/// 64 bytes are the signature of the highest peer id.
fn corrupt_last_peer_signature(circle: &Circle) -> Circle {
    let mut bytes = circle.encode().unwrap();
    let at = bytes.len() - 64;
    bytes[at] ^= 0x5a;
    Circle::decode(&bytes, None).unwrap()
}

fn run(keys: &Keys, known: &Circle, candidate: &Circle, local: Option<PeerId>) -> Verdict {
    evaluate(
        known,
        candidate,
        Some(&keys.previous_pub()),
        Some(&keys.current_pub()),
        local.as_ref(),
    )
}

mod isolated {
    use super::*;

    #[test]
    fn test_no_user_key() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let circle = offered(&keys.current, &a);
        let verdict = evaluate(&circle, &circle, Some(&keys.previous_pub()), None, None);
        assert_eq!(verdict, Verdict::NoUserKey);
    }

    #[test]
    fn test_empty_candidate_is_trusted() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let known = offered(&keys.current, &a);
        let candidate = known.reset_to_empty();
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::Trusted);
    }

    #[test]
    fn test_no_user_signature() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let candidate = Circle::new("default".into())
            .request_admission(&keys.current_pub(), a.peer())
            .unwrap();
        let known = Circle::new("default".into());
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::NoUserSignature);
    }

    #[test]
    fn test_bad_user_signature() {
        let keys = Keys::new();
        let a = device(&keys.oldest, 1);
        let candidate = offered(&keys.oldest, &a);
        let known = Circle::new("default".into());
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::BadUserSignature);
    }

    #[test]
    fn test_generation_old() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let b = device(&keys.current, 2);
        let older = offered(&keys.current, &a);
        let newer = admit(&older, &keys.current, &a, &b);
        assert_eq!(run(&keys, &newer, &older, None), Verdict::GenerationOld);
    }

    #[test]
    fn test_bad_peer_signature() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let known = offered(&keys.current, &a);
        let candidate = corrupt_last_peer_signature(&known);
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::BadPeerSignature);
    }

    #[test]
    fn test_no_trusted_peer_signature() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let b = device(&keys.current, 2);
        let d = device(&keys.current, 4);
        let known = admit(&offered(&keys.current, &a), &keys.current, &a, &b);
        // D re-signs alone, so neither A nor B has concurred.
        let candidate = admit(&known, &keys.current, &a, &d)
            .generation_sign(&keys.current, &d)
            .unwrap();
        assert_eq!(
            run(&keys, &known, &candidate, None),
            Verdict::NoTrustedPeerSignature
        );
    }

    #[test]
    fn test_no_trusted_peer_left() {
        let keys = Keys::new();
        let mut a = device(&keys.current, 1);
        let mut b = device(&keys.current, 2);
        let d = device(&keys.current, 4);
        let known = admit(&offered(&keys.current, &a), &keys.current, &a, &b);
        let signed_by_d = admit(&known, &keys.current, &a, &d)
            .generation_sign(&keys.current, &d)
            .unwrap();
        let (candidate, _) = signed_by_d
            .update_peer_info(&a.promote_to_retirement(1))
            .unwrap();
        let (candidate, _) = candidate
            .update_peer_info(&b.promote_to_retirement(1))
            .unwrap();
        assert_eq!(
            run(&keys, &known, &candidate, None),
            Verdict::NoTrustedPeerLeft
        );
    }

    #[test]
    fn test_trusted_after_accept() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let b = device(&keys.current, 2);
        let known = offered(&keys.current, &a);
        let candidate = admit(&known, &keys.current, &a, &b);
        assert_eq!(run(&keys, &known, &candidate, Some(b.peer_id())), Verdict::Trusted);
    }

    #[test]
    fn test_local_missing_signature_does_not_block() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let b = device(&keys.current, 2);
        let d = device(&keys.current, 4);
        let known = admit(&offered(&keys.current, &a), &keys.current, &a, &b);
        let candidate = admit(&known, &keys.current, &a, &d)
            .generation_sign(&keys.current, &d)
            .unwrap();
        // From B's view: A has not concurred but B itself is local.
        assert_eq!(
            run(&keys, &known, &candidate, Some(b.peer_id())),
            Verdict::NoTrustedPeerSignature
        );
        // A sole-member known circle whose only signer is local.
        let solo = offered(&keys.current, &a);
        let with_d = admit(&solo, &keys.current, &a, &d)
            .generation_sign(&keys.current, &d)
            .unwrap();
        assert_eq!(
            run(&keys, &solo, &with_d, Some(a.peer_id())),
            Verdict::NoTrustedPeerLeft
        );
    }
}

mod pairwise {
    use super::*;

    #[test]
    fn test_no_user_key_beats_everything() {
        let keys = Keys::new();
        let a = device(&keys.oldest, 1);
        let candidate = offered(&keys.oldest, &a);
        let verdict = evaluate(&candidate, &candidate, None, None, None);
        assert_eq!(verdict, Verdict::NoUserKey);
    }

    #[test]
    fn test_bad_user_signature_beats_generation_old() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let b = device(&keys.current, 2);
        let c = device(&keys.current, 3);
        let known = admit(
            &admit(&offered(&keys.current, &a), &keys.current, &a, &b),
            &keys.current,
            &a,
            &c,
        );
        let stale = device(&keys.oldest, 1);
        let candidate = offered(&keys.oldest, &stale);
        assert!(candidate.generation() < known.generation());
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::BadUserSignature);
    }

    #[test]
    fn test_no_user_signature_beats_generation_old() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let b = device(&keys.current, 2);
        let known = admit(&offered(&keys.current, &a), &keys.current, &a, &b);
        let candidate = Circle::new("default".into())
            .request_admission(&keys.current_pub(), b.peer())
            .unwrap();
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::NoUserSignature);
    }

    #[test]
    fn test_generation_old_beats_peer_checks() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let b = device(&keys.current, 2);
        let older = corrupt_last_peer_signature(&offered(&keys.current, &a));
        let newer = admit(&offered(&keys.current, &a), &keys.current, &a, &b);
        assert_eq!(run(&keys, &newer, &older, None), Verdict::GenerationOld);
    }

    #[test]
    fn test_unverified_known_still_reports_generation_old() {
        let keys = Keys::new();
        let a = device(&keys.oldest, 1);
        let b = device(&keys.oldest, 2);
        let known = admit(&offered(&keys.oldest, &a), &keys.oldest, &a, &b);
        let c = device(&keys.current, 3);
        let candidate = offered(&keys.current, &c);
        assert!(candidate.generation() < known.generation());
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::GenerationOld);
    }

    #[test]
    fn test_unverified_known_defers_to_candidate_signers() {
        let keys = Keys::new();
        let a = device(&keys.oldest, 1);
        let known = offered(&keys.oldest, &a);
        let c = device(&keys.current, 3);
        let d = device(&keys.current, 4);
        let candidate = admit(&offered(&keys.current, &c), &keys.current, &c, &d);
        assert!(candidate.generation() >= known.generation());
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::Trusted);
    }

    #[test]
    fn test_one_good_signer_outweighs_a_bad_one() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let b = device(&keys.current, 2);
        let known = admit(&offered(&keys.current, &a), &keys.current, &a, &b)
            .concordance_sign(&b)
            .unwrap();
        let candidate = corrupt_last_peer_signature(&known);
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::Trusted);
    }

    #[test]
    fn test_bad_peer_signature_beats_missing_signature() {
        let keys = Keys::new();
        let a = device(&keys.current, 1);
        let b = device(&keys.current, 2);
        // Only the approver signed; corrupting it leaves one bad, one absent.
        let known = admit(&offered(&keys.current, &a), &keys.current, &a, &b);
        let candidate = corrupt_last_peer_signature(&known);
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::BadPeerSignature);
    }

    #[test]
    fn test_missing_signature_beats_departed_signer() {
        let keys = Keys::new();
        let mut a = device(&keys.current, 1);
        let b = device(&keys.current, 2);
        let d = device(&keys.current, 4);
        let known = admit(&offered(&keys.current, &a), &keys.current, &a, &b);
        let signed_by_d = admit(&known, &keys.current, &a, &d)
            .generation_sign(&keys.current, &d)
            .unwrap();
        let (candidate, _) = signed_by_d
            .update_peer_info(&a.promote_to_retirement(1))
            .unwrap();
        assert_eq!(
            run(&keys, &known, &candidate, None),
            Verdict::NoTrustedPeerSignature
        );
    }
}

mod rollover {
    use super::*;

    #[test]
    fn test_previous_key_is_still_accepted() {
        let keys = Keys::new();
        let a = device(&keys.previous, 1);
        let candidate = offered(&keys.previous, &a);
        let known = Circle::new("default".into());
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::Trusted);
    }

    #[test]
    fn test_key_two_generations_back_is_rejected() {
        let keys = Keys::new();
        let a = device(&keys.oldest, 1);
        let candidate = offered(&keys.oldest, &a);
        let known = Circle::new("default".into());
        assert_eq!(run(&keys, &known, &candidate, None), Verdict::BadUserSignature);
    }

    #[test]
    fn test_known_circle_under_previous_key_still_guards_generation() {
        let keys = Keys::new();
        let a = device(&keys.previous, 1);
        let b = device(&keys.previous, 2);
        let older = offered(&keys.previous, &a);
        let newer = admit(&older, &keys.previous, &a, &b);
        assert_eq!(run(&keys, &newer, &older, None), Verdict::GenerationOld);
    }
}

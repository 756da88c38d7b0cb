//! Circle Property Tests
//!
//! Drives a circle through arbitrary sequences of membership operations and
//! checks the invariants that must hold after every step:
//!
//! - the generation never decreases
//! - the generation strictly increases whenever the peer set changes
//! - the circle stays generation-signed under the user key
//! - retirement is idempotent

use concord_circle::{Circle, FullPeerIdentity, Gestalt, PeerKind};
use concord_core::crypto::signing_key_from_seed;
use concord_core::{Ed25519SigningKey, PeerId};
use proptest::prelude::*;
use std::collections::BTreeSet;

const DEVICES: usize = 5;

#[derive(Debug, Clone)]
enum Op {
    Apply(usize),
    Accept(usize),
    Reject(usize),
    Withdraw(usize),
    Retire(usize),
    Finalize,
    ClearRejected,
}

fn arb_op() -> impl Strategy<Value = Op> {
    // Device 0 founds the circle and never retires, so an approver exists.
    prop_oneof![
        (1..DEVICES).prop_map(Op::Apply),
        (1..DEVICES).prop_map(Op::Accept),
        (1..DEVICES).prop_map(Op::Reject),
        (1..DEVICES).prop_map(Op::Withdraw),
        (1..DEVICES).prop_map(Op::Retire),
        Just(Op::Finalize),
        Just(Op::ClearRejected),
    ]
}

fn user() -> Ed25519SigningKey {
    signing_key_from_seed(&[0x42; 32])
}

fn devices() -> Vec<FullPeerIdentity> {
    (0..DEVICES)
        .map(|i| {
            FullPeerIdentity::create_application(
                &user(),
                signing_key_from_seed(&[i as u8 + 1; 32]),
                PeerKind::Device,
                Gestalt::named(format!("device-{i}")),
            )
        })
        .collect()
}

fn peer_set(circle: &Circle) -> BTreeSet<PeerId> {
    circle.peers().map(|p| p.peer_id()).collect()
}

fn apply(circle: &Circle, devices: &mut [FullPeerIdentity], op: &Op, step: u64) -> Circle {
    let user = user();
    let founder = devices[0].clone();
    let result = match op {
        Op::Apply(i) => circle.request_admission(&user.verifying_key(), devices[*i].peer()),
        Op::Accept(i) => circle.accept_applicant(&user, &founder, &devices[*i].peer_id()),
        Op::Reject(i) => circle.reject_applicant(&founder, &devices[*i].peer_id()),
        Op::Withdraw(i) => circle.withdraw_application(&devices[*i].peer_id()),
        Op::Retire(i) => {
            let tombstone = devices[*i].promote_to_retirement(step);
            circle.update_peer_info(&tombstone).map(|(next, _)| next)
        }
        Op::Finalize => circle.finalize_retirement(&user, &founder),
        Op::ClearRejected => Ok(circle.clear_rejected_applicants()),
    };
    // Rejected operations leave the installed value in place.
    result.unwrap_or_else(|_| circle.clone())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_generation_is_monotonic(ops in prop::collection::vec(arb_op(), 1..24)) {
        let mut devices = devices();
        let mut circle = Circle::new("default".into())
            .reset_to_offering(&user(), &devices[0])
            .unwrap();

        for (step, op) in ops.iter().enumerate() {
            let next = apply(&circle, &mut devices, op, step as u64);
            prop_assert!(next.generation() >= circle.generation());
            if peer_set(&next) != peer_set(&circle) {
                prop_assert!(next.generation() > circle.generation(), "{:?}", op);
            }
            prop_assert!(next.verify(&user().verifying_key()));
            prop_assert!(next.has_active_peer(&devices[0].peer_id()));
            circle = next;
        }
    }

    #[test]
    fn prop_retirement_is_idempotent(first in 0u64..1_000_000, later in 0u64..1_000_000) {
        let mut device = devices().remove(1);
        let once = device.promote_to_retirement(first);
        let twice = device.promote_to_retirement(later);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.retired_at(), Some(first));
        prop_assert!(twice.verify_self());
    }

    #[test]
    fn prop_reset_supersedes_any_history(ops in prop::collection::vec(arb_op(), 0..12)) {
        let mut devices = devices();
        let mut circle = Circle::new("default".into())
            .reset_to_offering(&user(), &devices[0])
            .unwrap();
        for (step, op) in ops.iter().enumerate() {
            circle = apply(&circle, &mut devices, op, step as u64);
        }
        let reset = circle.reset_to_offering(&user(), &devices[0]).unwrap();
        prop_assert!(reset.generation() > circle.generation());
        prop_assert_eq!(reset.count_peers(), 1);
        prop_assert_eq!(reset.count_applicants(), 0);
    }
}

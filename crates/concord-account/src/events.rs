//! Membership-change notifications

use concord_circle::Circle;
use concord_core::{CircleName, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Delta between two installed circle values.
///
/// Peers are compared by active membership, so a retirement counts as a
/// removal the moment the tombstone is observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChange {
    /// Circle that changed
    pub circle: CircleName,
    /// Generation of the newly installed circle
    pub generation: u64,
    /// Peers that became active
    pub added_peers: Vec<PeerId>,
    /// Peers that stopped being active
    pub removed_peers: Vec<PeerId>,
    /// New pending applications
    pub added_applicants: Vec<PeerId>,
    /// Applications that were accepted, rejected or withdrawn
    pub removed_applicants: Vec<PeerId>,
}

impl MembershipChange {
    /// Compute the delta from `old` to `new`; `None` when nothing changed.
    pub fn between(old: &Circle, new: &Circle) -> Option<Self> {
        let old_peers: BTreeSet<PeerId> = old.active_peers().map(|p| p.peer_id()).collect();
        let new_peers: BTreeSet<PeerId> = new.active_peers().map(|p| p.peer_id()).collect();
        let old_applicants: BTreeSet<PeerId> = old.applicants().map(|p| p.peer_id()).collect();
        let new_applicants: BTreeSet<PeerId> = new.applicants().map(|p| p.peer_id()).collect();

        let change = Self {
            circle: new.name().clone(),
            generation: new.generation(),
            added_peers: new_peers.difference(&old_peers).copied().collect(),
            removed_peers: old_peers.difference(&new_peers).copied().collect(),
            added_applicants: new_applicants.difference(&old_applicants).copied().collect(),
            removed_applicants: old_applicants.difference(&new_applicants).copied().collect(),
        };
        (!change.is_empty()).then_some(change)
    }

    /// Whether the delta is empty
    pub fn is_empty(&self) -> bool {
        self.added_peers.is_empty()
            && self.removed_peers.is_empty()
            && self.added_applicants.is_empty()
            && self.removed_applicants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_circle::{FullPeerIdentity, Gestalt, PeerKind};
    use concord_core::crypto::signing_key_from_seed;

    #[test]
    fn test_delta_on_accept() {
        let user = signing_key_from_seed(&[1u8; 32]);
        let device = |seed: u8| {
            FullPeerIdentity::create_application(
                &user,
                signing_key_from_seed(&[seed; 32]),
                PeerKind::Device,
                Gestalt::default(),
            )
        };
        let (a, b) = (device(2), device(3));
        let offered = Circle::new("default".into())
            .reset_to_offering(&user, &a)
            .unwrap();
        let applied = offered
            .request_admission(&user.verifying_key(), b.peer())
            .unwrap();
        let accepted = applied.accept_applicant(&user, &a, &b.peer_id()).unwrap();

        let change = MembershipChange::between(&applied, &accepted).unwrap();
        assert_eq!(change.added_peers, vec![b.peer_id()]);
        assert_eq!(change.removed_applicants, vec![b.peer_id()]);
        assert!(change.removed_peers.is_empty());
        assert!(MembershipChange::between(&accepted, &accepted).is_none());
    }
}

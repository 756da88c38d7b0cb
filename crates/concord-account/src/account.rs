//! Account state
//!
//! The [`Account`] exclusively owns the user credential and every circle
//! the device tracks. Each circle slot pairs the installed circle value
//! with the device's own full identity in that circle (if any). Slots for
//! circles whose data could not be understood become [`CircleSlot::Incompatible`]
//! placeholders so the remaining circles keep working.

use crate::credential::UserCredential;
use concord_circle::{Circle, FullPeerIdentity, Gestalt, RetirementTicket};
use concord_core::{CircleName, ConcordError, PeerId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why the device is not currently advancing membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepartureReason {
    /// Never applied to any circle
    NeverApplied,
    /// Currently a member
    NeverLeft,
    /// Left on request
    Withdrew,
    /// Removed or rejected by other members
    MembershipRevoked,
    /// Left because no trusted peer remained in the circle
    LeftUntrustedCircle,
}

/// Installed circle plus this device's identities in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleEntry {
    /// Installed circle value
    pub circle: Circle,
    /// This device's identity in the circle
    pub identity: Option<FullPeerIdentity>,
    /// Cloud identity created by this device for the circle
    pub cloud_identity: Option<FullPeerIdentity>,
}

impl CircleEntry {
    /// Fresh, absent circle with no local identity
    pub fn empty(name: CircleName) -> Self {
        Self {
            circle: Circle::new(name),
            identity: None,
            cloud_identity: None,
        }
    }

    /// Peer id of the local identity
    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.identity.as_ref().map(FullPeerIdentity::peer_id)
    }

    /// Whether the local identity is an active member
    pub fn is_local_member(&self) -> bool {
        self.local_peer_id()
            .is_some_and(|id| self.circle.has_active_peer(&id))
    }

    /// Whether the local identity has a pending application
    pub fn is_local_applicant(&self) -> bool {
        self.local_peer_id()
            .is_some_and(|id| self.circle.has_applicant(&id))
    }
}

/// One tracked circle name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircleSlot {
    /// Circle understood and tracked
    Tracked(CircleEntry),
    /// Circle data could not be decoded; abandoned locally
    Incompatible,
}

/// Per-circle membership state derived from the installed circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircleStatus {
    /// Circle absent, empty or incompatible
    NoCircle,
    /// Local device is the only active peer
    Offered,
    /// Local device is a member alongside others
    Populated,
    /// Local device has a pending application
    Applicant,
    /// Local device retired from the circle
    Retired,
    /// Circle exists but the device is not part of it
    NotInCircle,
}

/// Complete account state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub(crate) gestalt: Gestalt,
    pub(crate) credential: UserCredential,
    pub(crate) circles: BTreeMap<CircleName, CircleSlot>,
    pub(crate) retirement_tickets: BTreeMap<CircleName, BTreeMap<PeerId, RetirementTicket>>,
    pub(crate) departure_reason: DepartureReason,
    /// Remote circles received before any user key was trusted
    #[serde(skip)]
    pub(crate) pending_updates: BTreeMap<CircleName, Circle>,
}

impl Account {
    /// Fresh account tracking the given factory circles.
    pub fn new(gestalt: Gestalt, factory_circles: &[String]) -> Self {
        let mut account = Self {
            gestalt,
            credential: UserCredential::default(),
            circles: BTreeMap::new(),
            retirement_tickets: BTreeMap::new(),
            departure_reason: DepartureReason::NeverApplied,
            pending_updates: BTreeMap::new(),
        };
        account.ensure_factory_circles(factory_circles);
        account
    }

    /// Add an empty slot for every factory circle not yet tracked.
    pub fn ensure_factory_circles(&mut self, factory_circles: &[String]) {
        for name in factory_circles {
            self.ensure_circle(&CircleName::new(name.as_str()));
        }
    }

    /// Tracked slot for `name`, created empty if missing.
    pub fn ensure_circle(&mut self, name: &CircleName) -> &mut CircleSlot {
        self.circles
            .entry(name.clone())
            .or_insert_with(|| CircleSlot::Tracked(CircleEntry::empty(name.clone())))
    }

    /// Device metadata
    pub fn gestalt(&self) -> &Gestalt {
        &self.gestalt
    }

    /// User credential
    pub fn credential(&self) -> &UserCredential {
        &self.credential
    }

    /// Mutable user credential
    pub fn credential_mut(&mut self) -> &mut UserCredential {
        &mut self.credential
    }

    /// Why the device is not advancing membership
    pub fn departure_reason(&self) -> DepartureReason {
        self.departure_reason
    }

    /// Record a departure reason.
    ///
    /// The generic `NeverApplied` never replaces a more specific reason.
    pub fn note_departure(&mut self, reason: DepartureReason) {
        let specific = !matches!(
            self.departure_reason,
            DepartureReason::NeverApplied | DepartureReason::NeverLeft
        );
        if reason == DepartureReason::NeverApplied && specific {
            return;
        }
        self.departure_reason = reason;
    }

    /// Names of all slots, incompatible ones included
    pub fn circle_names(&self) -> Vec<CircleName> {
        self.circles.keys().cloned().collect()
    }

    /// Names of tracked (decodable) circles
    pub fn tracked_circle_names(&self) -> Vec<CircleName> {
        self.circles
            .iter()
            .filter(|(_, slot)| matches!(slot, CircleSlot::Tracked(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Slot for `name`
    pub fn slot(&self, name: &CircleName) -> Option<&CircleSlot> {
        self.circles.get(name)
    }

    /// Tracked entry for `name`
    pub fn entry(&self, name: &CircleName) -> Result<&CircleEntry> {
        match self.circles.get(name) {
            Some(CircleSlot::Tracked(entry)) => Ok(entry),
            Some(CircleSlot::Incompatible) => Err(ConcordError::incompatible_circle(format!(
                "{name} was abandoned"
            ))),
            None => Err(ConcordError::no_circle(name.as_str())),
        }
    }

    /// Mutable tracked entry for `name`
    pub fn entry_mut(&mut self, name: &CircleName) -> Result<&mut CircleEntry> {
        match self.circles.get_mut(name) {
            Some(CircleSlot::Tracked(entry)) => Ok(entry),
            Some(CircleSlot::Incompatible) => Err(ConcordError::incompatible_circle(format!(
                "{name} was abandoned"
            ))),
            None => Err(ConcordError::no_circle(name.as_str())),
        }
    }

    /// Installed circle for `name`
    pub fn circle(&self, name: &CircleName) -> Result<&Circle> {
        self.entry(name).map(|e| &e.circle)
    }

    /// Replace an incompatible placeholder with a fresh tracked slot.
    pub fn revive(&mut self, name: &CircleName) {
        let slot = self
            .circles
            .entry(name.clone())
            .or_insert(CircleSlot::Incompatible);
        if matches!(slot, CircleSlot::Incompatible) {
            *slot = CircleSlot::Tracked(CircleEntry::empty(name.clone()));
        }
    }

    /// Abandon a circle whose data could not be understood.
    pub fn mark_incompatible(&mut self, name: &CircleName) {
        self.circles.insert(name.clone(), CircleSlot::Incompatible);
        self.pending_updates.remove(name);
    }

    /// Derived membership state of the local device in `name`.
    pub fn circle_status(&self, name: &CircleName) -> Result<CircleStatus> {
        let entry = match self.circles.get(name) {
            Some(CircleSlot::Tracked(entry)) => entry,
            Some(CircleSlot::Incompatible) => return Ok(CircleStatus::NoCircle),
            None => return Err(ConcordError::no_circle(name.as_str())),
        };
        let circle = &entry.circle;
        if circle.is_empty() {
            return Ok(CircleStatus::NoCircle);
        }
        let Some(identity) = &entry.identity else {
            return Ok(CircleStatus::NotInCircle);
        };
        let id = identity.peer_id();
        let status = if identity.peer().is_retired() || circle.has_retiree(&id) {
            CircleStatus::Retired
        } else if circle.has_active_peer(&id) {
            if circle.count_active_peers() == 1 {
                CircleStatus::Offered
            } else {
                CircleStatus::Populated
            }
        } else if circle.has_applicant(&id) {
            CircleStatus::Applicant
        } else {
            CircleStatus::NotInCircle
        };
        Ok(status)
    }

    // ---- retirement tickets -------------------------------------------

    /// Store a retirement ticket, replacing any older one for the same peer.
    pub fn add_retirement_ticket(&mut self, ticket: RetirementTicket) {
        self.retirement_tickets
            .entry(ticket.circle.clone())
            .or_default()
            .insert(ticket.peer_id(), ticket);
    }

    /// Remove a ticket; returns it if present.
    pub fn remove_retirement_ticket(
        &mut self,
        circle: &CircleName,
        peer: &PeerId,
    ) -> Option<RetirementTicket> {
        let tickets = self.retirement_tickets.get_mut(circle)?;
        let removed = tickets.remove(peer);
        if tickets.is_empty() {
            self.retirement_tickets.remove(circle);
        }
        removed
    }

    /// Ticket for `(circle, peer)`
    pub fn retirement_ticket(&self, circle: &CircleName, peer: &PeerId) -> Option<&RetirementTicket> {
        self.retirement_tickets.get(circle)?.get(peer)
    }

    /// All stored tickets
    pub fn retirement_tickets(&self) -> impl Iterator<Item = &RetirementTicket> {
        self.retirement_tickets.values().flat_map(BTreeMap::values)
    }

    // ---- deferred updates ---------------------------------------------

    /// Keep the latest circle received while no user key is trusted.
    pub fn stash_update(&mut self, circle: Circle) {
        self.pending_updates.insert(circle.name().clone(), circle);
    }

    /// Take every stashed circle
    pub fn take_pending_updates(&mut self) -> Vec<Circle> {
        std::mem::take(&mut self.pending_updates)
            .into_values()
            .collect()
    }

    /// Number of stashed circles
    pub fn pending_update_count(&self) -> usize {
        self.pending_updates.len()
    }
}

//! Circle update handling
//!
//! Every circle that reaches the engine, remote or locally produced, goes
//! through [`TrustEngine::handle_update`]. Remote candidates are classified
//! by [`evaluate`] and the verdict is mapped to an [`Action`] by the pure
//! [`plan_action`]; local writes skip evaluation and are always published.

use super::TrustEngine;
use crate::account::DepartureReason;
use concord_circle::{evaluate, verifies_under, Circle, RetirementTicket, Verdict};
use concord_core::{CircleName, ConcordError, Result};
use tracing::{debug, error, info, warn};

/// What to do with a remote candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Install, add our concordance signature and finalize retirements
    CountersignAndAccept,
    /// Install without countersigning
    Accept,
    /// Retire the local identity, then install
    LeaveAndAccept,
    /// Keep the installed circle and re-publish it
    Revert,
    /// Drop the candidate silently
    Ignore,
    /// Invariant violation; the engine must stop
    Abort,
}

/// Map a verdict to an action.
///
/// `old_verified` is whether the installed circle verifies under the user
/// keys; `local_active` is whether the local identity is an active peer of
/// the candidate.
pub fn plan_action(verdict: Verdict, old_verified: bool, local_active: bool) -> Action {
    match verdict {
        Verdict::Trusted => Action::CountersignAndAccept,
        Verdict::GenerationOld if old_verified => Action::Revert,
        Verdict::GenerationOld => Action::Ignore,
        Verdict::BadUserSignature | Verdict::BadPeerSignature | Verdict::NoUserSignature
            if old_verified =>
        {
            Action::Revert
        }
        Verdict::BadUserSignature | Verdict::BadPeerSignature | Verdict::NoUserSignature => {
            Action::Accept
        }
        Verdict::NoTrustedPeerSignature => Action::Accept,
        Verdict::NoTrustedPeerLeft if local_active => Action::LeaveAndAccept,
        Verdict::NoTrustedPeerLeft => Action::Accept,
        Verdict::NoUserKey => Action::Abort,
    }
}

impl TrustEngine {
    /// Apply a circle value.
    ///
    /// With `is_local_write` the candidate was produced by this engine: it
    /// is installed and published without evaluation. Otherwise it is
    /// evaluated against the installed circle first. Returns whether the
    /// candidate was installed. Remote circles that arrive before any user
    /// key is trusted are stashed and replayed once credentials are
    /// asserted.
    ///
    /// # Panics
    ///
    /// When the evaluator reports [`Verdict::NoUserKey`] although a trusted
    /// key was checked for beforehand.
    pub async fn handle_update(&mut self, candidate: Circle, is_local_write: bool) -> Result<bool> {
        let name = candidate.name().clone();
        self.account.revive(&name);

        if is_local_write {
            self.accept(&name, candidate, false, true).await?;
            return Ok(true);
        }

        let Ok(current_key) = self.trusted_key() else {
            debug!(circle = %name, generation = candidate.generation(), "no trusted user key; deferring circle");
            self.account.stash_update(candidate);
            return Ok(false);
        };
        let previous_key = self.account.credential.previous_public_key().copied();

        let entry = self.account.entry(&name)?;
        if entry.circle == candidate {
            debug!(circle = %name, "circle unchanged");
            return Ok(false);
        }
        let local = entry.local_peer_id();
        let verdict = evaluate(
            &entry.circle,
            &candidate,
            previous_key.as_ref(),
            Some(&current_key),
            local.as_ref(),
        );
        let old_verified = verifies_under(&entry.circle, previous_key.as_ref(), Some(&current_key));
        let local_active = local.is_some_and(|id| candidate.has_active_peer(&id));
        let action = plan_action(verdict, old_verified, local_active);
        debug!(
            circle = %name,
            %verdict,
            ?action,
            generation = candidate.generation(),
            installed_generation = entry.circle.generation(),
            "evaluated circle"
        );

        match action {
            Action::Abort => {
                error!(circle = %name, "concordance evaluated without a user key");
                panic!("concordance for {name} evaluated without a user key");
            }
            Action::Ignore => Ok(false),
            Action::Revert => {
                self.revert(&name).await?;
                Ok(false)
            }
            Action::Accept => {
                self.accept(&name, candidate, false, false).await?;
                Ok(true)
            }
            Action::CountersignAndAccept => {
                self.accept(&name, candidate, true, false).await?;
                Ok(true)
            }
            Action::LeaveAndAccept => {
                info!(circle = %name, "no trusted peer left; leaving circle");
                let reason = DepartureReason::LeftUntrustedCircle;
                match self.retire_local(&name, candidate.clone(), reason)? {
                    Some((retired, ticket)) => {
                        self.accept(&name, retired, false, true).await?;
                        if let Some(ticket) = ticket {
                            self.publish_retirement(&ticket).await?;
                        }
                    }
                    None => self.accept(&name, candidate, false, false).await?,
                }
                Ok(true)
            }
        }
    }

    /// Decode and apply a remote circle.
    ///
    /// Undecodable data abandons the circle locally; a name mismatch is
    /// reported to the caller.
    pub async fn deliver_circle(&mut self, name: &CircleName, bytes: &[u8]) -> Result<bool> {
        match Circle::decode(bytes, Some(name)) {
            Ok(circle) => self.handle_update(circle, false).await,
            Err(err @ ConcordError::NameMismatch { .. }) => Err(err),
            Err(err) => {
                warn!(circle = %name, error = %err, "undecodable circle");
                self.mark_incompatible(name);
                Ok(false)
            }
        }
    }

    /// Apply a retirement record published by another device.
    ///
    /// The tombstone replaces the peer's active record; when we can sign,
    /// the retirement is finalized right away. Returns whether the circle
    /// changed.
    pub async fn handle_retirement(&mut self, name: &CircleName, bytes: &[u8]) -> Result<bool> {
        let ticket = RetirementTicket::decode(bytes)?;
        if ticket.circle != *name {
            return Err(ConcordError::name_mismatch(name.as_str(), ticket.circle.as_str()));
        }
        let entry = self.account.entry(name)?;
        let id = ticket.peer_id();
        if !entry.is_local_member() || !entry.circle.has_active_peer(&id) {
            debug!(circle = %name, peer = %id, "ignoring retirement record");
            return Ok(false);
        }
        let (candidate, changed) = entry.circle.update_peer_info(&ticket.peer)?;
        if !changed {
            return Ok(false);
        }
        let candidate = match (self.user_private_key().ok(), entry.identity.as_ref()) {
            (Some(key), Some(identity)) => candidate.finalize_retirement(&key, identity)?,
            _ => candidate,
        };
        info!(circle = %name, peer = %id, "peer retired");
        self.handle_update(candidate, true).await
    }

    // ---- actions -------------------------------------------------------

    async fn revert(&mut self, name: &CircleName) -> Result<()> {
        let entry = self.account.entry(name)?;
        if entry.is_local_member() {
            let installed = entry.circle.clone();
            info!(circle = %name, generation = installed.generation(), "rejecting circle; re-publishing ours");
            self.publish(&installed).await
        } else {
            debug!(circle = %name, "rejecting circle; not a member, nothing to re-publish");
            Ok(())
        }
    }

    /// Install `candidate` after local-identity bookkeeping.
    ///
    /// Publishes when the candidate was modified here or when `force_push`.
    pub(super) async fn accept(
        &mut self,
        name: &CircleName,
        candidate: Circle,
        countersign: bool,
        force_push: bool,
    ) -> Result<()> {
        let user_key = self.user_private_key().ok();
        let trusted = self.trusted_key().ok();
        let entry = self.account.entry(name)?;
        let old = entry.circle.clone();
        let identity = entry.identity.clone();

        let mut candidate = candidate;
        let mut mutated = false;
        let mut drop_identity = false;

        if let Some(identity) = identity.as_ref().filter(|i| !i.peer().is_retired()) {
            let id = identity.peer_id();
            if candidate.has_active_peer(&id) {
                self.account.note_departure(DepartureReason::NeverLeft);
                if candidate.peer(&id) != Some(identity.peer()) {
                    let (next, changed) = candidate.update_peer_info(identity.peer())?;
                    candidate = next;
                    mutated |= changed;
                }
                if countersign {
                    if let Some(key) = user_key.as_ref().filter(|_| candidate.has_retired_in_place()) {
                        candidate = candidate.finalize_retirement(key, identity)?;
                        mutated = true;
                    }
                    if !candidate.verify_peer_signed(identity.peer()) {
                        candidate = candidate.concordance_sign(identity)?;
                        mutated = true;
                    }
                }
            } else if old.has_active_peer(&id) {
                warn!(circle = %name, peer = %id, "local device removed from circle");
                self.account.note_departure(DepartureReason::MembershipRevoked);
                drop_identity = true;
            } else if old.has_applicant(&id) && !candidate.has_applicant(&id) {
                if candidate.has_rejected_applicant(&id) {
                    info!(circle = %name, peer = %id, "application rejected");
                    self.account.note_departure(DepartureReason::MembershipRevoked);
                } else if let Some(trusted) = trusted.filter(|k| identity.peer().verify_application(k)) {
                    match candidate.request_admission(&trusted, identity.peer()) {
                        Ok(next) => {
                            debug!(circle = %name, peer = %id, "re-applying after application was dropped");
                            candidate = next;
                            mutated = true;
                        }
                        Err(err) => {
                            warn!(circle = %name, peer = %id, error = %err, "re-application failed")
                        }
                    }
                }
            }
        }

        if drop_identity {
            self.account.entry_mut(name)?.identity = None;
        }
        let installed = self.install(name, candidate)?;
        self.after_install(name, installed).await;
        if mutated || force_push {
            let circle = self.account.circle(name)?.clone();
            self.publish(&circle).await?;
        }
        Ok(())
    }

    /// Retire the local identity in `base`.
    ///
    /// Members become tombstones in place and get a ticket; applicants
    /// withdraw. The ticket is recorded before anything is published.
    /// Returns `None` when the device is neither.
    pub(super) fn retire_local(
        &mut self,
        name: &CircleName,
        base: Circle,
        reason: DepartureReason,
    ) -> Result<Option<(Circle, Option<RetirementTicket>)>> {
        let now = self.now();
        let entry = self.account.entry_mut(name)?;
        let Some(identity) = entry.identity.as_mut() else {
            return Ok(None);
        };
        let id = identity.peer_id();
        let (next, ticket) = if base.has_active_peer(&id) {
            let tombstone = identity.promote_to_retirement(now);
            let (next, _) = base.update_peer_info(&tombstone)?;
            let ticket = RetirementTicket::new(name.clone(), tombstone, now)?;
            (next, Some(ticket))
        } else if base.has_applicant(&id) {
            identity.promote_to_retirement(now);
            (base.withdraw_application(&id)?, None)
        } else {
            return Ok(None);
        };

        if let Some(ticket) = &ticket {
            self.account.add_retirement_ticket(ticket.clone());
        }
        self.account.note_departure(reason);
        info!(circle = %name, peer = %id, ?reason, "retired local identity");
        Ok(Some((next, ticket)))
    }

    pub(super) async fn publish_retirement(&self, ticket: &RetirementTicket) -> Result<()> {
        let encoded = ticket.encode()?;
        let peer = ticket.peer_id();
        if let Err(err) = self
            .transport
            .post_retirement(&ticket.circle, peer, encoded)
            .await
        {
            warn!(circle = %ticket.circle, peer = %peer, error = %err, "posting retirement failed");
        }
        if let Err(err) = self.transport.cleanup_after_peer(&ticket.circle, peer).await {
            warn!(circle = %ticket.circle, peer = %peer, error = %err, "peer cleanup failed");
        }
        Ok(())
    }
}

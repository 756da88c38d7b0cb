//! Lifecycle operations: reset, join, leave, approve, maintain.
//!
//! Each operation builds its candidate from the installed circle and hands
//! it to `handle_update` as a local write. Operations that need to sign
//! fail with `PrivateKeyAbsent` before touching any state.

use super::TrustEngine;
use crate::account::DepartureReason;
use concord_circle::{FullPeerIdentity, Gestalt, PeerExtensions, PeerIdentity, PeerKind};
use concord_core::{CircleName, Ed25519SigningKey, PeerId, Result};
use tracing::{debug, info, warn};

impl TrustEngine {
    /// Restart every tracked circle with this device as the sole member.
    ///
    /// Abandoned circles are revived. With `use_cloud_identity` configured
    /// a cloud identity is admitted in the same generation.
    pub async fn reset_to_offering(&mut self) -> Result<()> {
        let user_key = self.user_private_key()?;
        let with_cloud = self.config.use_cloud_identity;
        for name in self.account.circle_names() {
            self.reset_circle(&name, &user_key, with_cloud).await?;
        }
        Ok(())
    }

    async fn reset_circle(
        &mut self,
        name: &CircleName,
        user_key: &Ed25519SigningKey,
        with_cloud: bool,
    ) -> Result<()> {
        self.account.revive(name);
        let gestalt = self.account.gestalt.clone();
        let entry = self.account.entry_mut(name)?;

        let founder = Self::identity_for(entry.identity.take(), user_key, PeerKind::Device, gestalt);
        let cloud = with_cloud.then(|| {
            Self::identity_for(
                entry.cloud_identity.take(),
                user_key,
                PeerKind::CloudIdentity,
                Gestalt::named("cloud"),
            )
        });
        let companions: Vec<&PeerIdentity> = cloud.iter().map(FullPeerIdentity::peer).collect();
        let result = entry.circle.reset_with_founders(user_key, &founder, &companions);
        entry.identity = Some(founder);
        if cloud.is_some() {
            entry.cloud_identity = cloud;
        }
        let candidate = result?;

        info!(circle = %name, generation = candidate.generation(), "circle reset");
        self.handle_update(candidate, true).await?;
        Ok(())
    }

    /// Apply to every tracked circle.
    ///
    /// Empty circles are reset with this device as founder. When this
    /// device already holds an active cloud identity in a circle and
    /// `use_cloud_identity` is set, the cloud identity admits the
    /// application immediately. Returns whether any circle was joined or
    /// applied to.
    pub async fn join_circle(&mut self, use_cloud_identity: bool) -> Result<bool> {
        let user_key = self.user_private_key()?;
        let mut joined = false;
        for name in self.account.tracked_circle_names() {
            joined |= self.join_one(&name, &user_key, use_cloud_identity).await?;
        }
        Ok(joined)
    }

    async fn join_one(
        &mut self,
        name: &CircleName,
        user_key: &Ed25519SigningKey,
        use_cloud_identity: bool,
    ) -> Result<bool> {
        let gestalt = self.account.gestalt.clone();
        let entry = self.account.entry_mut(name)?;
        if entry.circle.is_empty() {
            self.reset_circle(name, user_key, use_cloud_identity).await?;
            return Ok(true);
        }
        if entry.is_local_member() {
            debug!(circle = %name, "already a member");
            return Ok(false);
        }

        let identity = Self::identity_for(entry.identity.take(), user_key, PeerKind::Device, gestalt);
        let result = entry
            .circle
            .request_admission(&user_key.verifying_key(), identity.peer());
        entry.identity = Some(identity.clone());
        let mut candidate = result?;

        let cloud = entry
            .cloud_identity
            .clone()
            .filter(|c| use_cloud_identity && candidate.has_active_peer(&c.peer_id()));
        if let Some(cloud) = cloud {
            candidate = candidate.accept_applicant(user_key, &cloud, &identity.peer_id())?;
            info!(circle = %name, peer = %identity.peer_id(), "admitted by cloud identity");
        } else {
            info!(circle = %name, peer = %identity.peer_id(), "applied to circle");
        }
        self.handle_update(candidate, true).await?;
        Ok(true)
    }

    /// Retire from one circle.
    ///
    /// A member becomes a retirement tombstone, a ticket is recorded and
    /// published, and the transport cleans up after the local peer; an
    /// applicant withdraws. Returns whether the device was part of the
    /// circle.
    pub async fn leave_circle(&mut self, name: &CircleName) -> Result<bool> {
        let base = self.account.circle(name)?.clone();
        let Some((candidate, ticket)) = self.retire_local(name, base, DepartureReason::Withdrew)? else {
            debug!(circle = %name, "not part of circle; nothing to leave");
            return Ok(false);
        };
        self.handle_update(candidate, true).await?;
        if let Some(ticket) = ticket {
            self.publish_retirement(&ticket).await?;
        }
        Ok(true)
    }

    /// Retire from every tracked circle.
    pub async fn leave_all_circles(&mut self) -> Result<bool> {
        let mut left = false;
        for name in self.account.tracked_circle_names() {
            left |= self.leave_circle(&name).await?;
        }
        Ok(left)
    }

    /// Admit the given applicants wherever this device is a member.
    ///
    /// Returns the number of admissions.
    pub async fn accept_applicants(&mut self, applicants: &[PeerId]) -> Result<usize> {
        let user_key = self.user_private_key()?;
        let mut total = 0;
        for name in self.account.tracked_circle_names() {
            let entry = self.account.entry(&name)?;
            let Some(approver) = entry.identity.clone().filter(|_| entry.is_local_member()) else {
                continue;
            };
            let mut candidate = entry.circle.clone();
            let mut accepted = 0;
            for id in applicants.iter().filter(|id| entry.circle.has_applicant(id)) {
                candidate = candidate.accept_applicant(&user_key, &approver, id)?;
                accepted += 1;
            }
            if accepted > 0 {
                info!(circle = %name, accepted, generation = candidate.generation(), "accepted applicants");
                self.handle_update(candidate, true).await?;
                total += accepted;
            }
        }
        Ok(total)
    }

    /// Reject the given applicants wherever this device is a member.
    ///
    /// Rejection does not change the membership and needs no user key.
    pub async fn reject_applicants(&mut self, applicants: &[PeerId]) -> Result<usize> {
        let mut total = 0;
        for name in self.account.tracked_circle_names() {
            let entry = self.account.entry(&name)?;
            let Some(approver) = entry.identity.clone().filter(|_| entry.is_local_member()) else {
                continue;
            };
            let mut candidate = entry.circle.clone();
            let mut rejected = 0;
            for id in applicants.iter().filter(|id| entry.circle.has_applicant(id)) {
                candidate = candidate.reject_applicant(&approver, id)?;
                rejected += 1;
            }
            if rejected > 0 {
                info!(circle = %name, rejected, "rejected applicants");
                self.handle_update(candidate, true).await?;
                total += rejected;
            }
        }
        Ok(total)
    }

    /// Expel peers from one circle.
    pub async fn remove_peers_from_circle(
        &mut self,
        name: &CircleName,
        peers: &[PeerId],
    ) -> Result<usize> {
        let user_key = self.user_private_key()?;
        let entry = self.account.entry(name)?;
        let Some(signer) = entry.identity.clone().filter(|_| entry.is_local_member()) else {
            return Ok(0);
        };
        let mut candidate = entry.circle.clone();
        let mut removed = 0;
        for id in peers.iter().filter(|id| entry.circle.has_peer(id)) {
            candidate = candidate.remove_peer(&user_key, &signer, id)?;
            removed += 1;
        }
        if removed > 0 {
            info!(circle = %name, removed, "removed peers");
            self.handle_update(candidate, true).await?;
        }
        Ok(removed)
    }

    /// Forget rejected applicants in one circle.
    pub async fn clear_rejected_applicants(&mut self, name: &CircleName) -> Result<bool> {
        let entry = self.account.entry(name)?;
        if entry.circle.rejected_applicants().next().is_none() || !entry.is_local_member() {
            return Ok(false);
        }
        let candidate = entry.circle.clear_rejected_applicants();
        self.handle_update(candidate, true).await?;
        Ok(true)
    }

    /// Replace the device metadata and propagate it into every circle.
    pub async fn update_gestalt(&mut self, gestalt: Gestalt) -> Result<usize> {
        self.account.gestalt = gestalt.clone();
        self.refresh_peer_info(|identity| identity.update_gestalt(gestalt.clone()))
            .await
    }

    /// Replace the extension record and propagate it into every circle.
    pub async fn update_extensions(&mut self, extensions: PeerExtensions) -> Result<usize> {
        self.refresh_peer_info(|identity| identity.update_extensions(extensions.clone()))
            .await
    }

    async fn refresh_peer_info<F>(&mut self, mut update: F) -> Result<usize>
    where
        F: FnMut(&mut FullPeerIdentity) -> bool + Send,
    {
        let mut refreshed = 0;
        for name in self.account.tracked_circle_names() {
            let entry = self.account.entry_mut(&name)?;
            let Some(identity) = entry.identity.as_mut().filter(|i| !i.peer().is_retired()) else {
                continue;
            };
            if !update(identity) {
                continue;
            }
            let id = identity.peer_id();
            if !entry.circle.has_peer(&id) && !entry.circle.has_applicant(&id) {
                continue;
            }
            let (candidate, changed) = entry.circle.update_peer_info(identity.peer())?;
            if changed {
                self.handle_update(candidate, true).await?;
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    /// Re-sign after a user key change and sweep stale applications.
    ///
    /// For each circle: a stale local application is refreshed; a member
    /// re-signs a circle that no longer verifies under the trusted key;
    /// applications that no longer verify are withdrawn. The generation is
    /// not advanced.
    pub async fn generation_signature_update(&mut self) -> Result<()> {
        let trusted = self.trusted_key()?;
        let user_key = self.user_private_key().ok();
        for name in self.account.tracked_circle_names() {
            let entry = self.account.entry_mut(&name)?;
            let mut candidate = entry.circle.clone();
            let mut changed = false;

            if let (Some(identity), Some(key)) = (
                entry.identity.as_mut().filter(|i| !i.peer().is_retired()),
                user_key.as_ref(),
            ) {
                let id = identity.peer_id();
                let stale = !identity.peer().verify_application(&trusted);
                if stale {
                    identity.refresh_application(key);
                }
                if candidate.has_active_peer(&id) {
                    if stale {
                        let (next, updated) = candidate.update_peer_info(identity.peer())?;
                        candidate = next;
                        changed |= updated;
                    }
                    if !candidate.verify(&trusted) {
                        candidate = candidate.generation_sign(key, identity)?;
                        changed = true;
                    }
                } else if stale && candidate.has_applicant(&id) {
                    candidate = candidate.request_admission(&trusted, identity.peer())?;
                    changed = true;
                }
            }

            if entry.is_local_member() {
                let (swept, removed) = candidate.remove_invalid_applications(&trusted);
                if !removed.is_empty() {
                    info!(circle = %name, count = removed.len(), "withdrew stale applications");
                    candidate = swept;
                    changed = true;
                }
            }

            if changed {
                self.handle_update(candidate, true).await?;
            }
        }
        Ok(())
    }

    /// Drop retirement tickets older than the configured lifetime.
    ///
    /// Tickets for peers still active in their circle are kept. Returns the
    /// number of tickets dropped.
    pub async fn cleanup_retirement_tickets(&mut self) -> Result<usize> {
        let now = self.now();
        let ttl = self.config.retirement_ticket_ttl_secs;
        let expired: Vec<(CircleName, PeerId)> = self
            .account
            .retirement_tickets()
            .filter(|ticket| {
                let still_active = self
                    .account
                    .circle(&ticket.circle)
                    .is_ok_and(|c| c.has_active_peer(&ticket.peer_id()));
                ticket.is_expired(ttl, now, still_active)
            })
            .map(|ticket| (ticket.circle.clone(), ticket.peer_id()))
            .collect();

        for (circle, peer) in &expired {
            self.account.remove_retirement_ticket(circle, peer);
        }
        let count = expired.len();
        for (circle, peers) in Self::group_by_circle(expired) {
            debug!(circle = %circle, count = peers.len(), "expiring retirement tickets");
            if let Err(err) = self.transport.expire_retirement_records(&circle, &peers).await {
                warn!(circle = %circle, error = %err, "expiring retirement records failed");
            }
        }
        Ok(count)
    }
}

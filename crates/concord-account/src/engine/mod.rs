//! Account trust engine
//!
//! [`TrustEngine`] owns the [`Account`] and applies every circle mutation
//! as copy, modify, install: it reads the installed circle, builds a
//! candidate with the pure `Circle` operations, and installs the candidate
//! only when that succeeds. The engine itself is not synchronized; the
//! account service wraps it in a single async mutex that serializes local
//! operations and remote deliveries alike.
//!
//! - `credentials`: user key assertion and the private key cache
//! - `lifecycle`: reset, join, leave, accept, reject and maintenance
//! - `update`: `handle_update`, the verdict-to-action plan and its
//!   application

mod credentials;
mod lifecycle;
mod update;

pub use update::{plan_action, Action};

use crate::account::{Account, CircleStatus};
use crate::config::AccountConfig;
use crate::events::MembershipChange;
use crate::transport::CircleTransport;
use concord_circle::{Circle, FullPeerIdentity, Gestalt, PeerKind};
use concord_core::crypto::generate_signing_key;
use concord_core::{
    CircleName, Clock, Ed25519SigningKey, Ed25519VerifyingKey, PeerId, Result,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Side effects owed to the transport after a circle was installed.
#[derive(Debug, Default)]
struct Installed {
    /// Peers active before, inactive now
    newly_inactive: Vec<PeerId>,
    /// Local tickets whose retirement was finalized by the circle
    finalized: Vec<PeerId>,
    /// Other active members, set when membership changed and we are one
    sync_peers: Vec<PeerId>,
}

/// Orchestrates circle lifecycle operations for one account.
pub struct TrustEngine {
    account: Account,
    config: AccountConfig,
    transport: Arc<dyn CircleTransport>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<MembershipChange>,
}

impl std::fmt::Debug for TrustEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustEngine")
            .field("account", &self.account)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TrustEngine {
    /// Create an engine over an existing account.
    pub fn new(
        mut account: Account,
        config: AccountConfig,
        transport: Arc<dyn CircleTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        account.ensure_factory_circles(&config.factory_circles);
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            account,
            config,
            transport,
            clock,
            events,
        }
    }

    /// Account state
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Active configuration
    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    /// Current Unix time from the engine's clock
    pub fn now(&self) -> u64 {
        self.clock.now_secs()
    }

    /// Receive a [`MembershipChange`] for every installed transition.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipChange> {
        self.events.subscribe()
    }

    /// Make sure a slot exists for `name`.
    pub fn ensure_circle(&mut self, name: &CircleName) {
        self.account.ensure_circle(name);
    }

    /// Membership state of the local device in `name`.
    pub fn circle_status(&self, name: &CircleName) -> Result<CircleStatus> {
        self.account.circle_status(name)
    }

    /// Local peer id in `name`, if the device has an identity there.
    pub fn local_peer_id(&self, name: &CircleName) -> Option<PeerId> {
        self.account.entry(name).ok()?.local_peer_id()
    }

    /// Abandon a circle whose data could not be understood.
    pub fn mark_incompatible(&mut self, name: &CircleName) {
        warn!(circle = %name, "abandoning incompatible circle");
        self.account.mark_incompatible(name);
    }

    // ---- shared helpers ------------------------------------------------

    fn user_private_key(&self) -> Result<Ed25519SigningKey> {
        self.account
            .credential
            .private_key(self.now())
            .map(Clone::clone)
    }

    fn trusted_key(&self) -> Result<Ed25519VerifyingKey> {
        self.account.credential.trusted_public_key().copied()
    }

    /// Reuse a live identity (refreshing its endorsement) or mint a new one.
    fn identity_for(
        existing: Option<FullPeerIdentity>,
        user_key: &Ed25519SigningKey,
        kind: PeerKind,
        gestalt: Gestalt,
    ) -> FullPeerIdentity {
        match existing {
            Some(mut identity) if !identity.peer().is_retired() => {
                if kind == PeerKind::Device {
                    identity.update_gestalt(gestalt);
                }
                identity.refresh_application(user_key);
                identity
            }
            _ => FullPeerIdentity::create_application(
                user_key,
                generate_signing_key(),
                kind,
                gestalt,
            ),
        }
    }

    /// Swap in `candidate` and do the synchronous bookkeeping.
    fn install(&mut self, name: &CircleName, candidate: Circle) -> Result<Installed> {
        let trusted = self.trusted_key().ok();
        let entry = self.account.entry_mut(name)?;
        let old = std::mem::replace(&mut entry.circle, candidate);
        let new = &entry.circle;

        let mut installed = Installed {
            newly_inactive: old
                .active_peers()
                .map(|p| p.peer_id())
                .filter(|id| !new.has_active_peer(id))
                .collect(),
            ..Installed::default()
        };
        let change = MembershipChange::between(&old, new);
        if change.is_some() {
            if let Some(local) = entry.local_peer_id().filter(|id| new.has_active_peer(id)) {
                installed.sync_peers = new
                    .active_peers()
                    .map(|p| p.peer_id())
                    .filter(|id| *id != local)
                    .collect();
            }
        }
        let settled = trusted.is_some_and(|key| new.verify(&key));
        let retirees: Vec<PeerId> = new.retirees().map(|p| p.peer_id()).collect();

        for id in retirees {
            if self.account.remove_retirement_ticket(name, &id).is_some() {
                installed.finalized.push(id);
            }
        }
        if settled {
            self.account.credential.settle_previous_key();
        }
        if let Some(change) = change {
            info!(
                circle = %name,
                generation = change.generation,
                added = change.added_peers.len(),
                removed = change.removed_peers.len(),
                applicants_added = change.added_applicants.len(),
                applicants_removed = change.removed_applicants.len(),
                "membership changed"
            );
            // No subscribers is fine.
            let _ = self.events.send(change);
        }
        Ok(installed)
    }

    async fn after_install(&self, name: &CircleName, installed: Installed) {
        for peer in &installed.newly_inactive {
            if let Err(err) = self.transport.cleanup_after_peer(name, *peer).await {
                warn!(circle = %name, peer = %peer, error = %err, "peer cleanup failed");
            }
        }
        if !installed.finalized.is_empty() {
            if let Err(err) = self
                .transport
                .expire_retirement_records(name, &installed.finalized)
                .await
            {
                warn!(circle = %name, error = %err, "expiring retirement records failed");
            }
        }
        if !installed.sync_peers.is_empty() {
            if let Err(err) = self
                .transport
                .sync_with_peers(name, &installed.sync_peers)
                .await
            {
                warn!(circle = %name, error = %err, "sync request failed");
            }
        }
    }

    /// Encode and post a circle, then flush.
    ///
    /// Transport failures are logged; the installed state stays and is
    /// re-published on the next opportunity.
    async fn publish(&self, circle: &Circle) -> Result<()> {
        let name = circle.name();
        let encoded = circle.encode()?;
        debug!(circle = %name, generation = circle.generation(), "posting circle");
        if let Err(err) = self.transport.post_circle(name, encoded).await {
            warn!(circle = %name, error = %err, "posting circle failed");
            return Ok(());
        }
        if let Err(err) = self.transport.flush_pending_changes().await {
            warn!(circle = %name, error = %err, "flushing transport failed");
        }
        Ok(())
    }

    fn group_by_circle<I>(pairs: I) -> BTreeMap<CircleName, Vec<PeerId>>
    where
        I: IntoIterator<Item = (CircleName, PeerId)>,
    {
        let mut grouped: BTreeMap<CircleName, Vec<PeerId>> = BTreeMap::new();
        for (circle, peer) in pairs {
            grouped.entry(circle).or_default().push(peer);
        }
        grouped
    }
}

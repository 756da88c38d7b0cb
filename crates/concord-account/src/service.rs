//! Account service
//!
//! [`AccountService`] is the public entry point. It serializes every
//! operation and every transport delivery through one async mutex around
//! the [`TrustEngine`], derives user keys on the blocking pool so the lock
//! is never held during key derivation, and runs the private key purge
//! timer.

use crate::account::{Account, CircleStatus, DepartureReason};
use crate::config::AccountConfig;
use crate::credential::{derive_key, KeyDerivationParameters};
use crate::engine::TrustEngine;
use crate::events::MembershipChange;
use crate::transport::CircleTransport;
use concord_circle::{Circle, Gestalt, PeerExtensions};
use concord_core::{CircleName, Clock, ConcordError, Ed25519SigningKey, PeerId, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Serialized front end of the trust engine.
#[derive(Debug)]
pub struct AccountService {
    engine: Arc<Mutex<TrustEngine>>,
    purge_task: Mutex<Option<JoinHandle<()>>>,
}

impl AccountService {
    /// Wrap an engine.
    pub fn new(engine: TrustEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            purge_task: Mutex::new(None),
        }
    }

    /// Open an account from persisted bytes, or create a fresh one.
    ///
    /// Undecodable bytes yield a fresh account.
    pub fn open(
        persisted: Option<&[u8]>,
        gestalt: Gestalt,
        config: AccountConfig,
        transport: Arc<dyn CircleTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let account = match persisted {
            Some(bytes) => Account::decode_or_fresh(bytes, gestalt, &config.factory_circles),
            None => Account::new(gestalt, &config.factory_circles),
        };
        Ok(Self::new(TrustEngine::new(account, config, transport, clock)))
    }

    // ---- credentials ---------------------------------------------------

    /// Derive the user key from `password` and trust it.
    ///
    /// If the stored parameters re-derive the current public key the
    /// password is confirmed; otherwise fresh parameters are generated and
    /// the derived key replaces the user key. Always succeeds unless key
    /// derivation or signing fails.
    pub async fn assert_user_credentials(&self, password: &str) -> Result<bool> {
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let (existing, kdf) = {
            let engine = self.engine.lock().await;
            (
                engine.account().credential().key_parameters().cloned(),
                engine.config().key_derivation,
            )
        };

        if let Some(parameters) = existing {
            let user_key = derive_off_lock(password.clone(), parameters.clone()).await?;
            let mut engine = self.engine.lock().await;
            if engine
                .account()
                .credential()
                .matches_public_key(&user_key.verifying_key())
            {
                let asserted = engine
                    .assert_user_credentials_with_key(user_key, parameters)
                    .await?;
                drop(engine);
                self.schedule_purge().await;
                return Ok(asserted);
            }
        }

        info!("deriving a new user key");
        let parameters = KeyDerivationParameters::generate(&kdf);
        let user_key = derive_off_lock(password, parameters.clone()).await?;
        let asserted = self
            .engine
            .lock()
            .await
            .assert_user_credentials_with_key(user_key, parameters)
            .await?;
        self.schedule_purge().await;
        Ok(asserted)
    }

    /// Check `password` against the trusted key and cache the key if it
    /// matches. A mismatch changes nothing and yields `false`.
    pub async fn try_user_credentials(&self, password: &str) -> Result<bool> {
        let parameters = {
            let engine = self.engine.lock().await;
            engine.account().credential().key_parameters().cloned()
        };
        let Some(parameters) = parameters else {
            debug!("no key parameters; cannot check password");
            return Ok(false);
        };
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let user_key = derive_off_lock(password, parameters).await?;
        let accepted = self
            .engine
            .lock()
            .await
            .try_user_credentials_with_key(user_key)
            .await?;
        if accepted {
            self.schedule_purge().await;
        }
        Ok(accepted)
    }

    /// Like [`AccountService::try_user_credentials`], failing with
    /// `WrongPassword` on mismatch.
    pub async fn require_user_credentials(&self, password: &str) -> Result<()> {
        if self.try_user_credentials(password).await? {
            Ok(())
        } else {
            Err(ConcordError::WrongPassword)
        }
    }

    /// Drop the cached private key and cancel the purge timer.
    pub async fn purge_private_key(&self) -> bool {
        self.cancel_purge().await;
        self.engine.lock().await.purge_private_key()
    }

    /// Host lock-state notification; locking purges the private key.
    pub async fn on_lock_state_changed(&self, locked: bool) -> bool {
        if locked {
            self.cancel_purge().await;
        }
        self.engine.lock().await.on_lock_state_changed(locked)
    }

    // ---- lifecycle -----------------------------------------------------

    /// See [`TrustEngine::reset_to_offering`].
    pub async fn reset_to_offering(&self) -> Result<()> {
        self.engine.lock().await.reset_to_offering().await
    }

    /// See [`TrustEngine::join_circle`].
    pub async fn join_circle(&self, use_cloud_identity: bool) -> Result<bool> {
        self.engine.lock().await.join_circle(use_cloud_identity).await
    }

    /// See [`TrustEngine::leave_circle`].
    pub async fn leave_circle(&self, name: &CircleName) -> Result<bool> {
        self.engine.lock().await.leave_circle(name).await
    }

    /// Leave every circle within `timeout` (the configured default when
    /// `None`).
    ///
    /// Returns `Ok(false)` when the deadline passes first. Retirement
    /// tickets recorded before the deadline are kept either way.
    pub async fn bail_from_circle(&self, timeout: Option<Duration>) -> Result<bool> {
        let limit = match timeout {
            Some(limit) => limit,
            None => self.engine.lock().await.config().leave_timeout(),
        };
        let leave = async {
            let mut engine = self.engine.lock().await;
            engine.leave_all_circles().await
        };
        match tokio::time::timeout(limit, leave).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = saturating_millis(limit), "leaving circles timed out");
                Ok(false)
            }
        }
    }

    /// See [`TrustEngine::accept_applicants`].
    pub async fn accept_applicants(&self, applicants: &[PeerId]) -> Result<usize> {
        self.engine.lock().await.accept_applicants(applicants).await
    }

    /// See [`TrustEngine::reject_applicants`].
    pub async fn reject_applicants(&self, applicants: &[PeerId]) -> Result<usize> {
        self.engine.lock().await.reject_applicants(applicants).await
    }

    /// See [`TrustEngine::remove_peers_from_circle`].
    pub async fn remove_peers_from_circle(&self, name: &CircleName, peers: &[PeerId]) -> Result<usize> {
        self.engine
            .lock()
            .await
            .remove_peers_from_circle(name, peers)
            .await
    }

    /// See [`TrustEngine::clear_rejected_applicants`].
    pub async fn clear_rejected_applicants(&self, name: &CircleName) -> Result<bool> {
        self.engine.lock().await.clear_rejected_applicants(name).await
    }

    /// See [`TrustEngine::update_gestalt`].
    pub async fn update_gestalt(&self, gestalt: Gestalt) -> Result<usize> {
        self.engine.lock().await.update_gestalt(gestalt).await
    }

    /// See [`TrustEngine::update_extensions`].
    pub async fn update_extensions(&self, extensions: PeerExtensions) -> Result<usize> {
        self.engine.lock().await.update_extensions(extensions).await
    }

    /// See [`TrustEngine::generation_signature_update`].
    pub async fn generation_signature_update(&self) -> Result<()> {
        self.engine.lock().await.generation_signature_update().await
    }

    /// See [`TrustEngine::cleanup_retirement_tickets`].
    pub async fn cleanup_retirement_tickets(&self) -> Result<usize> {
        self.engine.lock().await.cleanup_retirement_tickets().await
    }

    // ---- transport deliveries -----------------------------------------

    /// Apply an encoded circle received from the transport.
    pub async fn deliver_circle(&self, name: &CircleName, bytes: &[u8]) -> Result<bool> {
        self.engine.lock().await.deliver_circle(name, bytes).await
    }

    /// Apply an encoded retirement record received from the transport.
    pub async fn deliver_retirement(&self, name: &CircleName, bytes: &[u8]) -> Result<bool> {
        self.engine.lock().await.handle_retirement(name, bytes).await
    }

    /// Record user key parameters received from the transport.
    pub async fn deliver_key_parameters(&self, bytes: &[u8]) -> Result<bool> {
        self.engine.lock().await.handle_key_parameters(bytes)
    }

    // ---- queries -------------------------------------------------------

    /// Copy of the account state.
    pub async fn snapshot(&self) -> Account {
        self.engine.lock().await.account().clone()
    }

    /// Persistable encoding of the account state.
    pub async fn encode_account(&self) -> Result<Vec<u8>> {
        self.engine.lock().await.account().encode()
    }

    /// Installed circle for `name`.
    pub async fn circle(&self, name: &CircleName) -> Result<Circle> {
        self.engine.lock().await.account().circle(name).cloned()
    }

    /// Membership state of this device in `name`.
    pub async fn circle_status(&self, name: &CircleName) -> Result<CircleStatus> {
        self.engine.lock().await.circle_status(name)
    }

    /// Local peer id in `name`.
    pub async fn local_peer_id(&self, name: &CircleName) -> Option<PeerId> {
        self.engine.lock().await.local_peer_id(name)
    }

    /// Why the device is not advancing membership.
    pub async fn departure_reason(&self) -> DepartureReason {
        self.engine.lock().await.account().departure_reason()
    }

    /// Whether a usable private key is cached.
    pub async fn has_private_key(&self) -> bool {
        let engine = self.engine.lock().await;
        engine.account().credential().has_private_key(engine.now())
    }

    /// Membership-change notifications.
    pub async fn subscribe(&self) -> broadcast::Receiver<MembershipChange> {
        self.engine.lock().await.subscribe()
    }

    // ---- purge timer ---------------------------------------------------

    async fn schedule_purge(&self) {
        let delay = {
            let engine = self.engine.lock().await;
            let Some(expires_at) = engine.account().credential().private_key_expires_at() else {
                return;
            };
            Duration::from_secs(expires_at.saturating_sub(engine.now()))
        };
        let engine = Arc::clone(&self.engine);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if engine.lock().await.purge_expired_private_key() {
                debug!("cached private key expired");
            }
        });
        if let Some(previous) = self.purge_task.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn cancel_purge(&self) {
        if let Some(task) = self.purge_task.lock().await.take() {
            task.abort();
        }
    }
}

impl Drop for AccountService {
    fn drop(&mut self) {
        if let Some(task) = self.purge_task.get_mut().take() {
            task.abort();
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn derive_off_lock(
    password: Zeroizing<Vec<u8>>,
    parameters: KeyDerivationParameters,
) -> Result<Ed25519SigningKey> {
    tokio::task::spawn_blocking(move || derive_key(&password, &parameters))
        .await
        .map_err(|e| ConcordError::internal(format!("key derivation task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_millis() {
        assert_eq!(saturating_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }
}

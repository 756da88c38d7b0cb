//! User credential operations
//!
//! Key derivation happens in the account service, off the engine lock;
//! these operations receive the derived key.

use super::TrustEngine;
use crate::credential::{KeyDerivationParameters, KeyParametersRecord};
use concord_core::{Ed25519SigningKey, Result};
use rand::Rng;
use tracing::{debug, info, warn};

impl TrustEngine {
    /// Trust `user_key` and cache it.
    ///
    /// A key different from the current public key becomes the new trusted
    /// key (the old one is kept as the rollback key) and its public half
    /// is published with `parameters`. Afterwards every circle is re-signed
    /// as needed and deferred remote updates are replayed.
    pub async fn assert_user_credentials_with_key(
        &mut self,
        user_key: Ed25519SigningKey,
        parameters: KeyDerivationParameters,
    ) -> Result<bool> {
        let public_key = user_key.verifying_key();
        let known = self.account.credential.matches_public_key(&public_key)
            && self.account.credential.key_parameters() == Some(&parameters);

        self.account.credential.trust_public_key(public_key);
        self.account.credential.set_key_parameters(parameters.clone());
        self.cache_private_key(user_key)?;

        if !known {
            info!("trusting new user key");
            let record = KeyParametersRecord {
                public_key,
                parameters,
            };
            if let Err(err) = self.transport.post_key_parameters(record.encode()?).await {
                warn!(error = %err, "posting key parameters failed");
            }
        }

        self.generation_signature_update().await?;
        self.replay_pending_updates().await?;
        Ok(true)
    }

    /// Cache `user_key` if it is the private half of the trusted key.
    ///
    /// Nothing changes otherwise.
    pub async fn try_user_credentials_with_key(&mut self, user_key: Ed25519SigningKey) -> Result<bool> {
        if !self
            .account
            .credential
            .matches_trusted_key(&user_key.verifying_key())
        {
            debug!("supplied key does not match the trusted user key");
            return Ok(false);
        }
        self.cache_private_key(user_key)?;
        self.generation_signature_update().await?;
        self.replay_pending_updates().await?;
        Ok(true)
    }

    /// Record key parameters observed from another device.
    ///
    /// The key stays untrusted until a password derives it here.
    pub fn handle_key_parameters(&mut self, bytes: &[u8]) -> Result<bool> {
        let record = KeyParametersRecord::decode(bytes)?;
        let changed = self
            .account
            .credential
            .set_untrusted_public_key(record.public_key, record.parameters);
        if changed {
            info!("observed new user key; password required");
        }
        Ok(changed)
    }

    /// Drop the cached private key.
    pub fn purge_private_key(&mut self) -> bool {
        self.account.credential.purge_private_key()
    }

    /// Drop the cached private key if its deadline passed.
    pub fn purge_expired_private_key(&mut self) -> bool {
        let now = self.now();
        self.account.credential.purge_expired(now)
    }

    /// Host lock-state notification.
    pub fn on_lock_state_changed(&mut self, locked: bool) -> bool {
        let purged = self.account.credential.on_lock_state_changed(locked);
        if purged {
            debug!("device locked; private key purged");
        }
        purged
    }

    fn cache_private_key(&mut self, user_key: Ed25519SigningKey) -> Result<()> {
        let jitter = match self.config.private_key_jitter_secs {
            0 => 0,
            max => rand::thread_rng().gen_range(0..=max),
        };
        let expires_at = self
            .now()
            .saturating_add(self.config.private_key_ttl_secs)
            .saturating_add(jitter);
        self.account.credential.cache_private_key(user_key, expires_at)
    }

    async fn replay_pending_updates(&mut self) -> Result<()> {
        let pending = self.account.take_pending_updates();
        if !pending.is_empty() {
            debug!(count = pending.len(), "replaying deferred circles");
        }
        for circle in pending {
            self.handle_update(circle, false).await?;
        }
        Ok(())
    }
}

//! User credential store
//!
//! Holds the account's user key material. The public key is either
//! *trusted* (confirmed by a password the user actually typed on this
//! device) or merely *observed* from another device over the transport.
//! One generation of rollback is kept in `previous_public_key` so circles
//! signed just before a password change still verify.
//!
//! The private key is cached transiently with an expiry deadline in Unix
//! seconds. Expiry is enforced lazily on every read; the account service
//! additionally runs a purge timer.

use crate::config::KeyDerivationConfig;
use argon2::{Algorithm, Argon2, Params, Version};
use concord_core::crypto::keys_equal;
use concord_core::{ConcordError, Ed25519SigningKey, Ed25519VerifyingKey, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Salt length for newly generated parameters.
pub const SALT_LEN: usize = 16;

/// Everything needed to re-derive the user key from the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParameters {
    /// Random salt
    pub salt: Vec<u8>,
    /// Argon2 memory cost in KiB
    pub memory_kib: u32,
    /// Argon2 passes
    pub iterations: u32,
    /// Argon2 lanes
    pub parallelism: u32,
}

impl KeyDerivationParameters {
    /// Fresh parameters with a random salt.
    pub fn generate(config: &KeyDerivationConfig) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            salt,
            memory_kib: config.memory_kib,
            iterations: config.iterations,
            parallelism: config.parallelism,
        }
    }
}

/// Derive the user signing key from a password.
///
/// Deterministic for identical inputs. CPU and memory heavy by design;
/// callers on an async runtime should run it on a blocking thread.
pub fn derive_key(password: &[u8], parameters: &KeyDerivationParameters) -> Result<Ed25519SigningKey> {
    let params = Params::new(
        parameters.memory_kib,
        parameters.iterations,
        parameters.parallelism,
        Some(32),
    )
    .map_err(|e| ConcordError::key_derivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut seed = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, &parameters.salt, &mut seed[..])
        .map_err(|e| ConcordError::key_derivation(e.to_string()))?;
    Ok(Ed25519SigningKey::from_bytes(&seed))
}

/// Public key and parameters published for other devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParametersRecord {
    /// User public key derived with `parameters`
    pub public_key: Ed25519VerifyingKey,
    /// Derivation parameters
    pub parameters: KeyDerivationParameters,
}

impl KeyParametersRecord {
    /// Encode for the transport
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ConcordError::serialization(e.to_string()))
    }

    /// Decode a record received from the transport
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| ConcordError::unexpected_type(e.to_string()))
    }
}

#[derive(Clone, PartialEq, Eq)]
struct CachedPrivateKey {
    key: Ed25519SigningKey,
    expires_at: u64,
}

/// The account's user key material.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    public_key: Option<Ed25519VerifyingKey>,
    previous_public_key: Option<Ed25519VerifyingKey>,
    public_key_trusted: bool,
    key_parameters: Option<KeyDerivationParameters>,
    #[serde(skip)]
    private_key: Option<CachedPrivateKey>,
}

impl std::fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredential")
            .field("public_key", &self.public_key)
            .field("previous_public_key", &self.previous_public_key)
            .field("public_key_trusted", &self.public_key_trusted)
            .field("key_parameters", &self.key_parameters)
            .field(
                "private_key",
                &self.private_key.as_ref().map(|c| c.expires_at),
            )
            .finish()
    }
}

impl UserCredential {
    /// Rebuild a credential from persisted parts; no private key.
    pub(crate) fn from_parts(
        public_key: Option<Ed25519VerifyingKey>,
        previous_public_key: Option<Ed25519VerifyingKey>,
        public_key_trusted: bool,
        key_parameters: Option<KeyDerivationParameters>,
    ) -> Self {
        Self {
            public_key,
            previous_public_key,
            public_key_trusted,
            key_parameters,
            private_key: None,
        }
    }

    /// Current public key, trusted or merely observed
    pub fn public_key(&self) -> Option<&Ed25519VerifyingKey> {
        self.public_key.as_ref()
    }

    /// Public key trusted immediately before the current one
    pub fn previous_public_key(&self) -> Option<&Ed25519VerifyingKey> {
        self.previous_public_key.as_ref()
    }

    /// Whether the current public key was confirmed by a password
    pub fn is_public_key_trusted(&self) -> bool {
        self.public_key_trusted && self.public_key.is_some()
    }

    /// Stored key-derivation parameters
    pub fn key_parameters(&self) -> Option<&KeyDerivationParameters> {
        self.key_parameters.as_ref()
    }

    /// Replace the stored key-derivation parameters
    pub fn set_key_parameters(&mut self, parameters: KeyDerivationParameters) {
        self.key_parameters = Some(parameters);
    }

    /// The trusted public key; observed-only keys do not qualify.
    pub fn trusted_public_key(&self) -> Result<&Ed25519VerifyingKey> {
        match &self.public_key {
            Some(key) if self.public_key_trusted => Ok(key),
            _ => Err(ConcordError::public_key_absent("no trusted user public key")),
        }
    }

    /// Whether `key` is the current public key, trusted or not
    pub fn matches_public_key(&self, key: &Ed25519VerifyingKey) -> bool {
        self.public_key.as_ref().is_some_and(|k| keys_equal(k, key))
    }

    /// Whether `key` is the trusted public key
    pub fn matches_trusted_key(&self, key: &Ed25519VerifyingKey) -> bool {
        self.public_key_trusted && self.matches_public_key(key)
    }

    /// Install `key` as the trusted public key.
    ///
    /// A previously trusted, different key becomes `previous_public_key`;
    /// when nothing was ever trusted both slots start out equal. Returns
    /// whether anything changed.
    pub fn trust_public_key(&mut self, key: Ed25519VerifyingKey) -> bool {
        if self.matches_trusted_key(&key) {
            return false;
        }
        if self.public_key_trusted {
            if let Some(current) = self.public_key {
                self.previous_public_key = Some(current);
            }
        }
        self.public_key = Some(key);
        self.public_key_trusted = true;
        if self.previous_public_key.is_none() {
            self.previous_public_key = Some(key);
        }
        if self
            .private_key
            .as_ref()
            .is_some_and(|c| !keys_equal(&c.key.verifying_key(), &key))
        {
            self.private_key = None;
        }
        true
    }

    /// Record a key observed from another device without trusting it.
    ///
    /// Leaves `previous_public_key` alone. Re-observing the trusted key is
    /// a no-op. Returns whether anything changed.
    pub fn set_untrusted_public_key(
        &mut self,
        key: Ed25519VerifyingKey,
        parameters: KeyDerivationParameters,
    ) -> bool {
        if self.matches_trusted_key(&key) {
            return false;
        }
        self.public_key = Some(key);
        self.public_key_trusted = false;
        self.key_parameters = Some(parameters);
        self.private_key = None;
        true
    }

    /// After a circle verified under the current key, make the current key
    /// the rollback key as well.
    pub fn settle_previous_key(&mut self) {
        if self.public_key_trusted {
            if let Some(current) = self.public_key {
                self.previous_public_key = Some(current);
            }
        }
    }

    /// Cache the private key until `expires_at`.
    ///
    /// The key must be the private half of the trusted public key.
    pub fn cache_private_key(&mut self, key: Ed25519SigningKey, expires_at: u64) -> Result<()> {
        if !self.matches_trusted_key(&key.verifying_key()) {
            return Err(ConcordError::internal(
                "private key does not match the trusted public key",
            ));
        }
        self.private_key = Some(CachedPrivateKey { key, expires_at });
        Ok(())
    }

    /// The cached private key, if present and not expired at `now`.
    pub fn private_key(&self, now: u64) -> Result<&Ed25519SigningKey> {
        match &self.private_key {
            Some(cached) if now < cached.expires_at => Ok(&cached.key),
            _ => Err(ConcordError::private_key_absent("user private key not cached")),
        }
    }

    /// Whether a usable private key is cached at `now`
    pub fn has_private_key(&self, now: u64) -> bool {
        self.private_key(now).is_ok()
    }

    /// Deadline of the cached key, if any
    pub fn private_key_expires_at(&self) -> Option<u64> {
        self.private_key.as_ref().map(|c| c.expires_at)
    }

    /// Drop the cached private key. Idempotent; returns whether one was held.
    pub fn purge_private_key(&mut self) -> bool {
        self.private_key.take().is_some()
    }

    /// Drop the cached private key if it expired by `now`.
    pub fn purge_expired(&mut self, now: u64) -> bool {
        match &self.private_key {
            Some(cached) if now >= cached.expires_at => self.purge_private_key(),
            _ => false,
        }
    }

    /// Host lock-state notification; locking purges the private key.
    pub fn on_lock_state_changed(&mut self, locked: bool) -> bool {
        locked && self.purge_private_key()
    }
}

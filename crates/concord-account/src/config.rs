//! Account configuration
//!
//! Loaded from TOML, optionally overridden from `CONCORD_*` environment
//! variables, and validated before use. Every field has a default so an
//! empty file is a valid configuration.

use concord_core::{ConcordError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Argon2 cost parameters used when fresh key-derivation parameters are
/// generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyDerivationConfig {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism (lanes)
    pub parallelism: u32,
}

impl Default for KeyDerivationConfig {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KeyDerivationConfig {
    fn validate(&self) -> Result<()> {
        if self.parallelism < argon2::Params::MIN_P_COST {
            return Err(ConcordError::config("key_derivation.parallelism must be at least 1"));
        }
        if self.iterations < argon2::Params::MIN_T_COST {
            return Err(ConcordError::config("key_derivation.iterations must be at least 1"));
        }
        if self.memory_kib < 8 * self.parallelism {
            return Err(ConcordError::config(format!(
                "key_derivation.memory_kib must be at least {} for {} lanes",
                8 * self.parallelism,
                self.parallelism
            )));
        }
        Ok(())
    }
}

/// Account-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Circles created on account creation and after every decode
    pub factory_circles: Vec<String>,
    /// Lifetime of the cached user private key
    pub private_key_ttl_secs: u64,
    /// Random extra lifetime added to the private key TTL
    pub private_key_jitter_secs: u64,
    /// Age after which an unobserved retirement ticket is dropped
    pub retirement_ticket_ttl_secs: u64,
    /// Costs for newly generated key-derivation parameters
    pub key_derivation: KeyDerivationConfig,
    /// Default deadline for a bounded leave
    pub leave_timeout_ms: u64,
    /// Buffer size of the membership-change broadcast channel
    pub event_channel_capacity: usize,
    /// Admit a cloud identity next to the founder on reset
    pub use_cloud_identity: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            factory_circles: vec!["default".to_string()],
            private_key_ttl_secs: 600,
            private_key_jitter_secs: 5,
            retirement_ticket_ttl_secs: 24 * 60 * 60,
            key_derivation: KeyDerivationConfig::default(),
            leave_timeout_ms: 5_000,
            event_channel_capacity: 64,
            use_cloud_identity: false,
        }
    }
}

impl AccountConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConcordError::config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConcordError::config(format!("Failed to read config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Apply `CONCORD_*` environment overrides, then re-validate.
    pub fn merge_with_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("CONCORD_PRIVATE_KEY_TTL_SECS") {
            self.private_key_ttl_secs = parse_env("CONCORD_PRIVATE_KEY_TTL_SECS", &value)?;
        }
        if let Ok(value) = std::env::var("CONCORD_RETIREMENT_TICKET_TTL_SECS") {
            self.retirement_ticket_ttl_secs =
                parse_env("CONCORD_RETIREMENT_TICKET_TTL_SECS", &value)?;
        }
        if let Ok(value) = std::env::var("CONCORD_LEAVE_TIMEOUT_MS") {
            self.leave_timeout_ms = parse_env("CONCORD_LEAVE_TIMEOUT_MS", &value)?;
        }
        if let Ok(value) = std::env::var("CONCORD_FACTORY_CIRCLES") {
            self.factory_circles = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        self.validate()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.factory_circles.is_empty() {
            return Err(ConcordError::config("factory_circles must not be empty"));
        }
        if self.factory_circles.iter().any(|c| c.trim().is_empty()) {
            return Err(ConcordError::config("factory circle names must not be blank"));
        }
        if self.private_key_ttl_secs == 0 {
            return Err(ConcordError::config("private_key_ttl_secs must be positive"));
        }
        if self.retirement_ticket_ttl_secs == 0 {
            return Err(ConcordError::config("retirement_ticket_ttl_secs must be positive"));
        }
        if self.leave_timeout_ms == 0 {
            return Err(ConcordError::config("leave_timeout_ms must be positive"));
        }
        if self.event_channel_capacity == 0 {
            return Err(ConcordError::config("event_channel_capacity must be positive"));
        }
        self.key_derivation.validate()
    }

    /// Cached private key lifetime, jitter excluded
    pub fn private_key_ttl(&self) -> Duration {
        Duration::from_secs(self.private_key_ttl_secs)
    }

    /// Default bounded-leave deadline
    pub fn leave_timeout(&self) -> Duration {
        Duration::from_millis(self.leave_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConcordError::config(format!("Invalid value in {name}: {value}")))
}

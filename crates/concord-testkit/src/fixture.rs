//! Device fixtures
//!
//! A [`DeviceFixture`] is one simulated device: an account service wired
//! to its own [`MemoryTransport`] and a [`ManualClock`]. Devices never
//! talk to each other directly; tests move data between them with the
//! `relay_*` helpers, which makes delivery order explicit.

use crate::clock::ManualClock;
use crate::transport::MemoryTransport;
use concord_account::{AccountConfig, AccountService, KeyDerivationConfig};
use concord_circle::Gestalt;
use concord_core::{CircleName, ConcordError, Result};
use std::sync::Arc;

/// Configuration with cheap key derivation for tests.
pub fn test_config(circles: &[&str]) -> AccountConfig {
    AccountConfig {
        factory_circles: circles.iter().map(|c| (*c).to_string()).collect(),
        key_derivation: KeyDerivationConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        },
        ..AccountConfig::default()
    }
}

/// One simulated device.
#[derive(Debug)]
pub struct DeviceFixture {
    /// Device name, also used as the gestalt name
    pub name: String,
    /// Account service under test
    pub service: AccountService,
    /// Everything this device posted
    pub transport: MemoryTransport,
    /// This device's clock
    pub clock: ManualClock,
    /// Configuration the service was opened with
    pub config: AccountConfig,
}

impl DeviceFixture {
    /// Fresh device tracking `circles`.
    pub fn new(name: &str, circles: &[&str]) -> Result<Self> {
        Self::with_config(name, test_config(circles), ManualClock::default())
    }

    /// Fresh device with explicit configuration and clock.
    pub fn with_config(name: &str, config: AccountConfig, clock: ManualClock) -> Result<Self> {
        let transport = MemoryTransport::new();
        let service = AccountService::open(
            None,
            Gestalt::named(name),
            config.clone(),
            Arc::new(transport.clone()),
            Arc::new(clock.clone()),
        )?;
        Ok(Self {
            name: name.to_string(),
            service,
            transport,
            clock,
            config,
        })
    }

    /// Simulate a restart: reopen from persisted bytes, sharing transport
    /// and clock.
    pub fn reopen(&self, persisted: &[u8]) -> Result<Self> {
        let service = AccountService::open(
            Some(persisted),
            Gestalt::named(self.name.as_str()),
            self.config.clone(),
            Arc::new(self.transport.clone()),
            Arc::new(self.clock.clone()),
        )?;
        Ok(Self {
            name: self.name.clone(),
            service,
            transport: self.transport.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        })
    }
}

/// Deliver the latest circle `from` posted for `name` to `to`.
pub async fn relay_circle(from: &DeviceFixture, to: &DeviceFixture, name: &str) -> Result<bool> {
    let name = CircleName::from(name);
    let bytes = from
        .transport
        .last_circle_bytes(&name)
        .await
        .ok_or_else(|| ConcordError::internal(format!("{} posted no {name}", from.name)))?;
    to.service.deliver_circle(&name, &bytes).await
}

/// Deliver the latest key parameters `from` posted to `to`.
pub async fn relay_key_parameters(from: &DeviceFixture, to: &DeviceFixture) -> Result<bool> {
    let bytes = from
        .transport
        .last_key_parameters()
        .await
        .ok_or_else(|| ConcordError::internal(format!("{} posted no key parameters", from.name)))?;
    to.service.deliver_key_parameters(&bytes).await
}

/// Deliver the latest retirement record `from` posted for `name` to `to`.
pub async fn relay_retirement(from: &DeviceFixture, to: &DeviceFixture, name: &str) -> Result<bool> {
    let name = CircleName::from(name);
    let bytes = from
        .transport
        .last_retirement_bytes(&name)
        .await
        .ok_or_else(|| ConcordError::internal(format!("{} posted no retirement in {name}", from.name)))?;
    to.service.deliver_retirement(&name, &bytes).await
}

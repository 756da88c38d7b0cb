//! # Concord Account
//!
//! Account-level orchestration of circle trust:
//!
//! - [`UserCredential`]: trusted user public key with one generation of
//!   rollback, key-derivation parameters and the transient private key
//! - [`Account`]: credential plus every tracked circle, persisted through
//!   [`Account::encode`] / [`Account::decode`]
//! - [`TrustEngine`]: lifecycle operations and remote update handling
//! - [`AccountService`]: the serialized public entry point
//! - [`CircleTransport`]: the outbound transport boundary
//!
//! Configuration comes from [`AccountConfig`].

#![forbid(unsafe_code)]

/// Account state and per-circle slots
pub mod account;

/// Configuration loading and validation
pub mod config;

/// User credential store and key derivation
pub mod credential;

/// Trust engine
pub mod engine;

/// Membership-change notifications
pub mod events;

/// Versioned account encoding
pub mod persistence;

/// Serialized account service
pub mod service;

/// Transport boundary
pub mod transport;

pub use account::{Account, CircleEntry, CircleSlot, CircleStatus, DepartureReason};
pub use config::{AccountConfig, KeyDerivationConfig};
pub use credential::{derive_key, KeyDerivationParameters, KeyParametersRecord, UserCredential};
pub use engine::{plan_action, Action, TrustEngine};
pub use events::MembershipChange;
pub use persistence::{ACCOUNT_FORMAT_VERSION, ACCOUNT_MAGIC};
pub use service::AccountService;
pub use transport::{CircleTransport, TransportError, TransportResult};

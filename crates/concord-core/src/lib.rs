//! # Concord Core
//!
//! Foundation types shared by the circle trust crates:
//!
//! - `ConcordError`: the unified error type and `Result` alias
//! - `PeerId` / `CircleName`: identifiers
//! - `crypto`: domain-separated hashing and Ed25519 helpers
//! - `Clock`: wall-clock abstraction for deterministic tests
//!
//! Nothing here knows about circles or accounts; it is the layer the
//! circle value types and the account engine are built on.

#![forbid(unsafe_code)]

/// Domain-separated hashing and Ed25519 helpers
pub mod crypto;

/// Unified error handling
pub mod errors;

/// Peer and circle identifiers
pub mod identifiers;

/// Wall-clock abstraction
pub mod time;

pub use crypto::{Ed25519Signature, Ed25519SigningKey, Ed25519VerifyingKey};
pub use errors::{ConcordError, Result};
pub use identifiers::{CircleName, PeerId};
pub use time::{Clock, SystemClock};

//! # Concord Circle
//!
//! Value types for circle membership and the concordance evaluator:
//!
//! - [`PeerIdentity`] / [`FullPeerIdentity`]: self-signed peer records and
//!   their user-key endorsement (the application)
//! - [`PeerExtensions`]: versioned extension attributes
//! - [`Circle`]: the signed, versioned membership set
//! - [`evaluate`]: pure classification of a candidate circle into a
//!   [`Verdict`]
//!
//! Everything here is synchronous and side-effect free apart from
//! `tracing` output; the account engine owns state and ordering.

#![forbid(unsafe_code)]

/// Circle value type and its transitions
pub mod circle;

/// Candidate circle classification
pub mod concordance;

/// Peer extension attributes
pub mod extensions;

/// Peer records and retirement tickets
pub mod peer;

mod codec;

pub use circle::{Circle, CIRCLE_ENCODING_VERSION};
pub use concordance::{evaluate, verifies_under, Verdict};
pub use extensions::{PeerExtensions, TransportPreference, EXTENSIONS_VERSION};
pub use peer::{FullPeerIdentity, Gestalt, PeerIdentity, PeerKind, RetirementTicket};

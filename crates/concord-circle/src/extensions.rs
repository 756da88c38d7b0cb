//! Versioned peer extension attributes
//!
//! Mutable per-peer settings that travel with the peer record. Known
//! attributes are named fields; anything written by a newer peer that this
//! version does not understand is carried verbatim in `unknown` so a
//! re-signed record round-trips without loss.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Current extension layout version.
pub const EXTENSIONS_VERSION: u16 = 2;

/// Preferred transport for peer-to-peer sync traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportPreference {
    /// Shared key-value store relayed through the account's cloud storage.
    KeyValueStore,
    /// Direct device-to-device messaging.
    DirectMessaging,
}

/// Extension attributes of a peer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerExtensions {
    /// Layout version that wrote this record
    pub version: u16,
    /// Views (sync sub-domains) the peer has enabled
    pub views_enabled: BTreeSet<String>,
    /// Hardware serial number
    pub serial_number: Option<String>,
    /// Public half of the peer's backup key
    pub backup_key: Option<Vec<u8>>,
    /// Host device identifier
    pub device_id: Option<String>,
    /// Preferred transport
    pub transport_preference: Option<TransportPreference>,
    /// Declared security properties
    pub security_properties: BTreeSet<String>,
    /// Attributes written by a newer layout, kept opaque
    pub unknown: Vec<u8>,
}

impl Default for PeerExtensions {
    fn default() -> Self {
        Self {
            version: EXTENSIONS_VERSION,
            views_enabled: BTreeSet::new(),
            serial_number: None,
            backup_key: None,
            device_id: None,
            transport_preference: None,
            security_properties: BTreeSet::new(),
            unknown: Vec::new(),
        }
    }
}

impl PeerExtensions {
    /// Enable a view, returning whether it was newly added.
    pub fn enable_view(&mut self, view: impl Into<String>) -> bool {
        self.views_enabled.insert(view.into())
    }

    /// Disable a view, returning whether it had been enabled.
    pub fn disable_view(&mut self, view: &str) -> bool {
        self.views_enabled.remove(view)
    }

    /// Whether a view is enabled.
    pub fn has_view(&self, view: &str) -> bool {
        self.views_enabled.contains(view)
    }

    /// True when written by a layout newer than this one.
    pub fn is_from_newer_layout(&self) -> bool {
        self.version > EXTENSIONS_VERSION
    }
}

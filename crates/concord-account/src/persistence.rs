//! Account persistence
//!
//! Current layout (V2): `b"CNCD"`, a big-endian `u16` version, then the
//! bincode-encoded [`Account`]. Earlier releases wrote a JSON document
//! (V1) with hex-encoded keys and per-circle blobs; it is still accepted on
//! load. Decoders are tried newest first. When every decoder fails the
//! caller gets an error, or a fresh account via [`Account::decode_or_fresh`].

use crate::account::{Account, CircleEntry, CircleSlot, DepartureReason};
use crate::credential::{KeyDerivationParameters, UserCredential};
use concord_circle::{Circle, FullPeerIdentity, Gestalt};
use concord_core::{CircleName, ConcordError, Ed25519VerifyingKey, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Leading bytes of every current-format account blob.
pub const ACCOUNT_MAGIC: &[u8; 4] = b"CNCD";

/// Version written by [`Account::encode`].
pub const ACCOUNT_FORMAT_VERSION: u16 = 2;

const HEADER_LEN: usize = 6;

impl Account {
    /// Serialize the persistent part of the account.
    ///
    /// The cached private key and stashed remote updates are not written.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self).map_err(|e| ConcordError::serialization(e.to_string()))?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(ACCOUNT_MAGIC);
        out.extend_from_slice(&ACCOUNT_FORMAT_VERSION.to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode, falling back through older layouts.
    pub fn decode(bytes: &[u8]) -> Result<Account> {
        let decoders: [(&str, fn(&[u8]) -> Result<Account>); 2] =
            [("v2", decode_v2), ("v1", decode_v1)];
        let mut last_error = ConcordError::unexpected_type("empty account data");
        for (version, decoder) in decoders {
            match decoder(bytes) {
                Ok(account) => return Ok(account),
                Err(err) => {
                    debug!(version, error = %err, "account decoder did not accept data");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Decode, or start over with a fresh account when nothing fits.
    ///
    /// Factory circles missing from the decoded account are recreated empty.
    pub fn decode_or_fresh(bytes: &[u8], gestalt: Gestalt, factory_circles: &[String]) -> Account {
        let mut account = Account::decode(bytes).unwrap_or_else(|err| {
            warn!(error = %err, "discarding undecodable account state");
            Account::new(gestalt, factory_circles)
        });
        account.ensure_factory_circles(factory_circles);
        account
    }
}

fn decode_v2(bytes: &[u8]) -> Result<Account> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != ACCOUNT_MAGIC {
        return Err(ConcordError::unexpected_type("missing account header"));
    }
    let version = u16::from_be_bytes([bytes[4], bytes[5]]);
    if version != ACCOUNT_FORMAT_VERSION {
        return Err(ConcordError::unexpected_type(format!(
            "unsupported account version {version}"
        )));
    }
    bincode::deserialize(&bytes[HEADER_LEN..])
        .map_err(|e| ConcordError::unexpected_type(e.to_string()))
}

#[derive(Deserialize)]
struct LegacyAccountV1 {
    device_name: String,
    #[serde(default)]
    user_public_key: Option<String>,
    #[serde(default)]
    previous_public_key: Option<String>,
    #[serde(default)]
    public_key_trusted: bool,
    #[serde(default)]
    key_parameters: Option<KeyDerivationParameters>,
    #[serde(default)]
    departure_reason: Option<DepartureReason>,
    circles: Vec<LegacyCircleV1>,
}

#[derive(Deserialize)]
struct LegacyCircleV1 {
    name: String,
    /// Hex of an encoded circle
    #[serde(default)]
    circle: Option<String>,
    /// Hex of a bincode full identity
    #[serde(default)]
    identity: Option<String>,
}

fn decode_v1(bytes: &[u8]) -> Result<Account> {
    let legacy: LegacyAccountV1 =
        serde_json::from_slice(bytes).map_err(|e| ConcordError::unexpected_type(e.to_string()))?;

    let credential = UserCredential::from_parts(
        legacy.user_public_key.as_deref().map(parse_key).transpose()?,
        legacy
            .previous_public_key
            .as_deref()
            .map(parse_key)
            .transpose()?,
        legacy.public_key_trusted,
        legacy.key_parameters,
    );

    let mut circles = BTreeMap::new();
    for record in legacy.circles {
        let name = CircleName::new(record.name);
        let slot = match legacy_entry(&name, record.circle.as_deref(), record.identity.as_deref()) {
            Ok(entry) => CircleSlot::Tracked(entry),
            Err(err) => {
                warn!(circle = %name, error = %err, "legacy circle abandoned");
                CircleSlot::Incompatible
            }
        };
        circles.insert(name, slot);
    }

    Ok(Account {
        gestalt: Gestalt::named(legacy.device_name),
        credential,
        circles,
        retirement_tickets: BTreeMap::new(),
        departure_reason: legacy
            .departure_reason
            .unwrap_or(DepartureReason::NeverApplied),
        pending_updates: BTreeMap::new(),
    })
}

fn legacy_entry(
    name: &CircleName,
    circle: Option<&str>,
    identity: Option<&str>,
) -> Result<CircleEntry> {
    let circle = match circle {
        Some(encoded) => Circle::decode(&parse_hex(encoded)?, Some(name))?,
        None => Circle::new(name.clone()),
    };
    let identity = identity
        .map(|encoded| {
            bincode::deserialize::<FullPeerIdentity>(&parse_hex(encoded)?)
                .map_err(|e| ConcordError::unexpected_type(e.to_string()))
        })
        .transpose()?;
    Ok(CircleEntry {
        circle,
        identity,
        cloud_identity: None,
    })
}

fn parse_hex(encoded: &str) -> Result<Vec<u8>> {
    hex::decode(encoded).map_err(|e| ConcordError::unexpected_type(e.to_string()))
}

fn parse_key(encoded: &str) -> Result<Ed25519VerifyingKey> {
    let bytes: [u8; 32] = parse_hex(encoded)?
        .try_into()
        .map_err(|_| ConcordError::unexpected_type("public key must be 32 bytes"))?;
    Ed25519VerifyingKey::from_bytes(&bytes).map_err(ConcordError::from)
}

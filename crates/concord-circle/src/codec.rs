//! Canonical byte encoding for signed content

use serde::Serialize;

/// Deterministic bincode encoding of an in-memory value.
///
/// Only used on plain data types (strings, integers, sets, byte vectors)
/// whose encoding cannot fail.
#[allow(clippy::expect_used)]
pub(crate) fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("plain data types always encode")
}

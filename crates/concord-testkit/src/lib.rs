//! # Concord Testkit
//!
//! Shared test infrastructure for the concord crates:
//!
//! - [`MemoryTransport`]: recording transport with failure and latency
//!   injection
//! - [`ManualClock`]: deterministic clock
//! - [`DeviceFixture`] and the `relay_*` helpers: multi-device scenarios
//!   with explicit delivery order
//!
//! ```toml
//! [dev-dependencies]
//! concord-testkit = { workspace = true }
//! ```

pub mod clock;
pub mod fixture;
pub mod transport;

pub use clock::ManualClock;
pub use fixture::{relay_circle, relay_key_parameters, relay_retirement, test_config, DeviceFixture};
pub use transport::{MemoryTransport, TransportLog};

/// Install a test-friendly `tracing` subscriber.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

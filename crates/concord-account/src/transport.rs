//! Transport boundary
//!
//! The engine publishes circles, retirement records and key parameters
//! through a [`CircleTransport`] handed to it at construction. Incoming
//! data flows the other way through the account service's `deliver_*`
//! entry points, which the adapter must call in receipt order per circle.

use async_trait::async_trait;
use concord_core::{CircleName, ConcordError, PeerId};

/// Failures reported by transport adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The backing store or channel is not reachable
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    /// The backing store refused the write
    #[error("post rejected: {0}")]
    Rejected(String),
}

impl From<TransportError> for ConcordError {
    fn from(err: TransportError) -> Self {
        ConcordError::transport(err.to_string())
    }
}

/// Result alias for transport calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Outbound half of the transport, consumed by the trust engine.
#[async_trait]
pub trait CircleTransport: Send + Sync {
    /// Publish an encoded circle
    async fn post_circle(&self, circle: &CircleName, encoded: Vec<u8>) -> TransportResult<()>;

    /// Publish an encoded retirement ticket for `peer`
    async fn post_retirement(
        &self,
        circle: &CircleName,
        peer: PeerId,
        encoded: Vec<u8>,
    ) -> TransportResult<()>;

    /// Drop published retirement records that are no longer needed
    async fn expire_retirement_records(
        &self,
        circle: &CircleName,
        peers: &[PeerId],
    ) -> TransportResult<()>;

    /// Ask the sync layer to talk to these circle members
    async fn sync_with_peers(&self, circle: &CircleName, peers: &[PeerId]) -> TransportResult<()>;

    /// Flush anything buffered by earlier posts
    async fn flush_pending_changes(&self) -> TransportResult<()>;

    /// Publish the user public key and its derivation parameters
    async fn post_key_parameters(&self, encoded: Vec<u8>) -> TransportResult<()>;

    /// Drop message-queue state kept for a departed peer
    async fn cleanup_after_peer(&self, _circle: &CircleName, _peer: PeerId) -> TransportResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_conversion() {
        let err: ConcordError = TransportError::Unavailable("offline".into()).into();
        assert_eq!(
            err,
            ConcordError::transport("transport unavailable: offline")
        );
    }
}

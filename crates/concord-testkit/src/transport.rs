//! In-memory transport
//!
//! Records everything the engine posts so tests can relay it to other
//! devices and assert on it. Failures and latency can be injected.

use async_trait::async_trait;
use concord_account::{CircleTransport, TransportError, TransportResult};
use concord_core::{CircleName, PeerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Everything posted through a [`MemoryTransport`].
#[derive(Debug, Default)]
pub struct TransportLog {
    /// Every circle post, in order
    pub circles: Vec<(CircleName, Vec<u8>)>,
    /// Every retirement post, in order
    pub retirements: Vec<(CircleName, PeerId, Vec<u8>)>,
    /// Every key parameter post, in order
    pub key_parameters: Vec<Vec<u8>>,
    /// Expired retirement records per circle
    pub expired: HashMap<CircleName, Vec<PeerId>>,
    /// Sync requests
    pub syncs: Vec<(CircleName, Vec<PeerId>)>,
    /// Peers cleaned up after
    pub cleanups: Vec<(CircleName, PeerId)>,
    /// Number of flushes
    pub flushes: usize,
}

/// Recording [`CircleTransport`] for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    log: Arc<RwLock<TransportLog>>,
    failing: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl MemoryTransport {
    /// New transport with an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent post fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every subsequent call.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Latest circle posted for `name`
    pub async fn last_circle_bytes(&self, name: &CircleName) -> Option<Vec<u8>> {
        let log = self.log.read().await;
        log.circles
            .iter()
            .rev()
            .find(|(circle, _)| circle == name)
            .map(|(_, bytes)| bytes.clone())
    }

    /// Number of circle posts for `name`
    pub async fn circle_post_count(&self, name: &CircleName) -> usize {
        let log = self.log.read().await;
        log.circles.iter().filter(|(circle, _)| circle == name).count()
    }

    /// Latest key parameter record
    pub async fn last_key_parameters(&self) -> Option<Vec<u8>> {
        self.log.read().await.key_parameters.last().cloned()
    }

    /// Latest retirement record posted for `name`
    pub async fn last_retirement_bytes(&self, name: &CircleName) -> Option<Vec<u8>> {
        let log = self.log.read().await;
        log.retirements
            .iter()
            .rev()
            .find(|(circle, _, _)| circle == name)
            .map(|(_, _, bytes)| bytes.clone())
    }

    /// Peers whose retirement records were expired in `name`
    pub async fn expired_records(&self, name: &CircleName) -> Vec<PeerId> {
        self.log.read().await.expired.get(name).cloned().unwrap_or_default()
    }

    /// Peers cleaned up after in `name`
    pub async fn cleaned_up(&self, name: &CircleName) -> Vec<PeerId> {
        let log = self.log.read().await;
        log.cleanups
            .iter()
            .filter(|(circle, _)| circle == name)
            .map(|(_, peer)| *peer)
            .collect()
    }

    /// Number of flushes
    pub async fn flush_count(&self) -> usize {
        self.log.read().await.flushes
    }

    /// Number of sync requests
    pub async fn sync_count(&self) -> usize {
        self.log.read().await.syncs.len()
    }

    async fn gate(&self) -> TransportResult<()> {
        let millis = self.latency_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CircleTransport for MemoryTransport {
    async fn post_circle(&self, circle: &CircleName, encoded: Vec<u8>) -> TransportResult<()> {
        self.gate().await?;
        self.log.write().await.circles.push((circle.clone(), encoded));
        Ok(())
    }

    async fn post_retirement(
        &self,
        circle: &CircleName,
        peer: PeerId,
        encoded: Vec<u8>,
    ) -> TransportResult<()> {
        self.gate().await?;
        self.log
            .write()
            .await
            .retirements
            .push((circle.clone(), peer, encoded));
        Ok(())
    }

    async fn expire_retirement_records(
        &self,
        circle: &CircleName,
        peers: &[PeerId],
    ) -> TransportResult<()> {
        self.gate().await?;
        self.log
            .write()
            .await
            .expired
            .entry(circle.clone())
            .or_default()
            .extend_from_slice(peers);
        Ok(())
    }

    async fn sync_with_peers(&self, circle: &CircleName, peers: &[PeerId]) -> TransportResult<()> {
        self.gate().await?;
        self.log
            .write()
            .await
            .syncs
            .push((circle.clone(), peers.to_vec()));
        Ok(())
    }

    async fn flush_pending_changes(&self) -> TransportResult<()> {
        self.gate().await?;
        self.log.write().await.flushes += 1;
        Ok(())
    }

    async fn post_key_parameters(&self, encoded: Vec<u8>) -> TransportResult<()> {
        self.gate().await?;
        self.log.write().await.key_parameters.push(encoded);
        Ok(())
    }

    async fn cleanup_after_peer(&self, circle: &CircleName, peer: PeerId) -> TransportResult<()> {
        self.gate().await?;
        self.log.write().await.cleanups.push((circle.clone(), peer));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_posts() {
        let transport = MemoryTransport::new();
        let name = CircleName::from("keychain");
        transport.post_circle(&name, vec![1]).await.unwrap();
        transport.post_circle(&name, vec![2]).await.unwrap();
        transport.flush_pending_changes().await.unwrap();

        assert_eq!(transport.last_circle_bytes(&name).await, Some(vec![2]));
        assert_eq!(transport.circle_post_count(&name).await, 2);
        assert_eq!(transport.flush_count().await, 1);
        assert!(transport.last_circle_bytes(&"photos".into()).await.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let transport = MemoryTransport::new();
        transport.set_failing(true);
        assert!(transport.post_key_parameters(vec![0]).await.is_err());
        transport.set_failing(false);
        transport.post_key_parameters(vec![0]).await.unwrap();
        assert_eq!(transport.last_key_parameters().await, Some(vec![0]));
    }
}

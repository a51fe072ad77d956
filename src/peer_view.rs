//! Peer View — the in-memory, last-writer-wins mapping of peer identity to
//! advertised free-CPU milli-cores.
//!
//! A cheaply-`Clone`-able struct wrapping an `Arc<RwLock<HashMap<_, _>>>`,
//! with async accessor methods so callers never see a lock guard escape the
//! module.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Thread-safe peer → free-CPU (milli-cores) mapping.
///
/// No removal API in the baseline — entries persist for the life of the
/// process once written. A peer that dies leaves its last-advertised value
/// in place indefinitely; no TTL-based eviction is implemented.
#[derive(Clone, Default, Debug)]
pub struct PeerView {
    inner: Arc<RwLock<HashMap<String, u64>>>,
}

impl PeerView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a peer's free-CPU reading. Last writer wins.
    pub async fn update(&self, peer: impl Into<String>, milli_cpu: u64) {
        let mut map = self.inner.write().await;
        map.insert(peer.into(), milli_cpu);
    }

    /// An immutable point-in-time copy of the current mapping. Captures every
    /// `update()` call that had already returned before this call started —
    /// no tearing, since the write lock serializes against concurrent writers
    /// and the read lock only ever observes a fully-written map.
    pub async fn snapshot(&self) -> HashMap<String, u64> {
        self.inner.read().await.clone()
    }

    /// This node's own last-advertised free-CPU value, or 0 if never set.
    pub async fn self_cpu(&self, self_id: &str) -> u64 {
        self.inner.read().await.get(self_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_then_snapshot_reflects_value() {
        let view = PeerView::new();
        view.update("alpha", 4).await;
        let snap = view.snapshot().await;
        assert_eq!(snap.get("alpha"), Some(&4));
    }

    #[tokio::test]
    async fn later_update_overwrites_earlier_for_same_key() {
        let view = PeerView::new();
        view.update("alpha", 4).await;
        view.update("alpha", 9).await;
        assert_eq!(view.snapshot().await.get("alpha"), Some(&9));
    }

    #[tokio::test]
    async fn self_cpu_defaults_to_zero() {
        let view = PeerView::new();
        assert_eq!(view.self_cpu("nobody").await, 0);
    }

    #[tokio::test]
    async fn clone_shares_underlying_state() {
        let view = PeerView::new();
        let clone = view.clone();
        view.update("beta", 7).await;
        assert_eq!(clone.snapshot().await.get("beta"), Some(&7));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_clobber_each_other() {
        let view = PeerView::new();
        view.update("alpha", 4).await;
        view.update("beta", 2).await;
        let snap = view.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("alpha"), Some(&4));
        assert_eq!(snap.get("beta"), Some(&2));
    }
}

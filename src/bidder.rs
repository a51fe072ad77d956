//! Bidder / Binder — the core decentralized-scheduling algorithm.
//!
//! On a local-pod-loss event: consult the Offline Detector, compare this
//! node's advertised free CPU against every peer's (lexicographic-smallest
//! identity wins ties), and if this node wins, issue an optimistic bind. The
//! control plane's 409-on-rebind is the sole consistency point — this module
//! never coordinates with peers beyond reading their last-gossiped capacity.

use std::time::Instant;

use thiserror::Error;

use crate::api_client::{ApiClient, ApiError, BindOutcome};
use crate::events::PodGone;
use crate::metrics::Metrics;
use crate::offline::OfflineDetector;
use crate::peer_view::PeerView;

/// Anything that can answer "is the control plane reachable". Exists so the
/// Bidder's online/offline gate can be driven by a fake probe in tests
/// without standing up a live control-plane endpoint.
#[async_trait::async_trait]
pub trait OfflineProbe: Send + Sync {
    async fn is_offline(&self) -> bool;
}

#[async_trait::async_trait]
impl OfflineProbe for OfflineDetector {
    async fn is_offline(&self) -> bool {
        OfflineDetector::is_offline(self).await
    }
}

#[derive(Debug, Error)]
pub enum BidError {
    #[error("lost bind race to another node (409)")]
    BindConflict,
    #[error("bind request failed: {0}")]
    Transport(#[from] ApiError),
}

/// The per-event outcome, useful to callers that want to observe what
/// happened beyond the metric side-effects (e.g. tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidOutcome {
    /// Control plane was reachable; this agent deferred to it.
    DeferredOnline,
    /// Lost the capacity comparison (or tie-break) to another peer.
    LostBid { winner: String },
    /// Won the bid and the bind succeeded.
    Won,
    /// Won the bid but another node's bind landed first.
    Conflicted,
}

pub struct Bidder {
    self_id: String,
    offline_detector: Box<dyn OfflineProbe>,
    peer_view: PeerView,
    api_client: ApiClient,
    metrics: Metrics,
}

impl Bidder {
    pub fn new(
        self_id: impl Into<String>,
        offline_detector: OfflineDetector,
        peer_view: PeerView,
        api_client: ApiClient,
        metrics: Metrics,
    ) -> Self {
        Bidder {
            self_id: self_id.into(),
            offline_detector: Box::new(offline_detector),
            peer_view,
            api_client,
            metrics,
        }
    }

    #[cfg(test)]
    fn with_probe(
        self_id: impl Into<String>,
        offline_detector: impl OfflineProbe + 'static,
        peer_view: PeerView,
        api_client: ApiClient,
        metrics: Metrics,
    ) -> Self {
        Bidder {
            self_id: self_id.into(),
            offline_detector: Box::new(offline_detector),
            peer_view,
            api_client,
            metrics,
        }
    }

    /// Runs the full state machine for one pod-disappearance event. Never
    /// propagates `BidError::BindConflict` to the caller as a process-fatal
    /// error — it is the expected steady-state outcome of a contested race
    /// and is returned so the caller can decide whether to log it.
    pub async fn handle_pod_gone(&self, event: &PodGone) -> Result<BidOutcome, BidError> {
        let started = Instant::now();

        if !self.offline_detector.is_offline().await {
            log::debug!(
                "bidder: control plane reachable, deferring on {}/{}",
                event.namespace,
                event.name
            );
            return Ok(BidOutcome::DeferredOnline);
        }

        let snapshot = self.peer_view.snapshot().await;
        let self_cpu = snapshot.get(&self.self_id).copied().unwrap_or(0);

        if let Some(winner) = self.losing_peer(&snapshot, self_cpu) {
            log::debug!(
                "bidder: lost bid for {}/{} to {winner}",
                event.namespace,
                event.name
            );
            return Ok(BidOutcome::LostBid { winner });
        }

        match self
            .api_client
            .bind(&event.namespace, &event.name, &self.self_id)
            .await?
        {
            BindOutcome::Bound => {
                let elapsed = started.elapsed().as_secs_f64();
                self.metrics.restore_latency_seconds.observe(elapsed);
                log::info!(
                    "bidder: won bid and bound {}/{} to {} in {elapsed:.3}s",
                    event.namespace,
                    event.name,
                    self.self_id
                );
                Ok(BidOutcome::Won)
            }
            BindOutcome::Conflict => {
                self.metrics.bind_conflicts_total.inc();
                log::debug!(
                    "bidder: bind conflict for {}/{}, another node won",
                    event.namespace,
                    event.name
                );
                Ok(BidOutcome::Conflicted)
            }
        }
    }

    /// Returns the identity of a peer this node loses to, if any.
    ///
    /// A strictly-higher advertised CPU always wins. An equal value wins
    /// only if its identity sorts lexicographically before `self_id` — the
    /// REQUIRED deterministic tie-break that the original source lacked.
    fn losing_peer(&self, snapshot: &std::collections::HashMap<String, u64>, self_cpu: u64) -> Option<String> {
        snapshot
            .iter()
            .filter(|(peer, _)| *peer != &self.self_id)
            .find(|(peer, &cpu)| cpu > self_cpu || (cpu == self_cpu && *peer < &self.self_id))
            .map(|(peer, _)| peer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    /// A probe that always answers a fixed verdict, for driving both branches
    /// of the online/offline gate without a live control-plane endpoint.
    struct FixedProbe(bool);

    #[async_trait::async_trait]
    impl OfflineProbe for FixedProbe {
        async fn is_offline(&self) -> bool {
            self.0
        }
    }

    fn metrics() -> Metrics {
        Metrics::new().expect("fresh registry never collides in tests")
    }

    fn unreachable_api_client() -> ApiClient {
        ApiClient::new("http://127.0.0.1:1", Duration::from_millis(50))
    }

    fn bidder_with_offline(self_id: &str, offline: bool) -> Bidder {
        Bidder::with_probe(
            self_id,
            FixedProbe(offline),
            PeerView::new(),
            unreachable_api_client(),
            metrics(),
        )
    }

    #[tokio::test]
    async fn strictly_higher_peer_wins() {
        let bidder = bidder_with_offline("alpha", true);

        let mut snapshot = HashMap::new();
        snapshot.insert("alpha".to_string(), 3u64);
        snapshot.insert("beta".to_string(), 5u64);

        assert_eq!(bidder.losing_peer(&snapshot, 3), Some("beta".to_string()));
    }

    #[tokio::test]
    async fn tie_is_broken_by_lexicographically_smaller_identity() {
        let bidder_alpha = bidder_with_offline("alpha", true);
        let bidder_beta = bidder_with_offline("beta", true);

        let mut snapshot = HashMap::new();
        snapshot.insert("alpha".to_string(), 3u64);
        snapshot.insert("beta".to_string(), 3u64);

        // alpha < beta lexicographically, so alpha wins the tie: no losing peer for alpha.
        assert_eq!(bidder_alpha.losing_peer(&snapshot, 3), None);
        // beta loses to alpha.
        assert_eq!(bidder_beta.losing_peer(&snapshot, 3), Some("alpha".to_string()));
    }

    #[tokio::test]
    async fn sole_peer_with_no_rivals_always_wins_capacity_check() {
        let bidder = bidder_with_offline("alpha", true);

        let mut snapshot = HashMap::new();
        snapshot.insert("alpha".to_string(), 0u64);

        assert_eq!(bidder.losing_peer(&snapshot, 0), None);
    }

    #[tokio::test]
    async fn online_control_plane_defers_without_touching_peer_view() {
        let bidder = bidder_with_offline("alpha", false);
        bidder.peer_view.update("beta", 9999).await;

        let outcome = bidder
            .handle_pod_gone(&PodGone {
                namespace: "default".into(),
                name: "foo".into(),
                uid: "u1".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, BidOutcome::DeferredOnline);
        assert_eq!(bidder.metrics.bind_conflicts_total.get(), 0);
    }

    #[tokio::test]
    async fn offline_lost_bid_returns_outcome_without_calling_bind() {
        let bidder = bidder_with_offline("alpha", true);
        bidder.peer_view.update("alpha", 1).await;
        bidder.peer_view.update("beta", 9).await;

        let outcome = bidder
            .handle_pod_gone(&PodGone {
                namespace: "default".into(),
                name: "foo".into(),
                uid: "u1".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, BidOutcome::LostBid { winner: "beta".to_string() });
    }
}

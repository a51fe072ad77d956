//! Agent — the single value wiring every component together at startup.
//!
//! One owned struct constructed once in `bootstrap()` and threaded through
//! the rest of the process explicitly, rather than module-level mutable
//! singletons.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api_client::ApiClient;
use crate::bidder::Bidder;
use crate::cache::{CacheError, DesiredStateCache};
use crate::config::Config;
use crate::events::{AgentEvent, EventSource, ReplicaSetRecord};
use crate::gossip::{GossipEngine, TcpLineGossipTransport};
use crate::metrics::{Metrics, MetricsError};
use crate::offline::OfflineDetector;
use crate::peer_view::PeerView;

#[derive(Debug, Error)]
pub enum FatalStartupFailure {
    #[error("cache initialization failed: {0}")]
    Cache(#[from] CacheError),
    #[error("metrics registration failed: {0}")]
    Metrics(#[from] MetricsError),
}

pub struct Agent {
    config: Config,
    cache: DesiredStateCache,
    peer_view: PeerView,
    bidder: Bidder,
    metrics: Metrics,
    shutdown: CancellationToken,
}

impl Agent {
    /// Wires every component. The only fallible step at startup — anything
    /// that fails here is a `FatalStartupFailure` and the process should
    /// exit non-zero.
    pub async fn bootstrap(config: Config) -> Result<Self, FatalStartupFailure> {
        let cache = DesiredStateCache::open(&config.cache_path).await?;
        let metrics = Metrics::new()?;
        let peer_view = PeerView::new();

        let recovered = cache.load_all().await?;
        log::info!(
            "agent: cold boot recovered {} cached replica-set spec(s) from {}",
            recovered.len(),
            config.cache_path
        );

        let api_client = ApiClient::new(config.control_plane_url.clone(), config.control_plane_timeout);
        let offline_detector = OfflineDetector::new(api_client.clone());

        let bidder = Bidder::new(
            config.node_name.clone(),
            offline_detector,
            peer_view.clone(),
            api_client,
            metrics.clone(),
        );

        Ok(Agent {
            config,
            cache,
            peer_view,
            bidder,
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawns the Gossip Engine and Metrics Server as background tasks, then
    /// drains `events` until the source is exhausted or shutdown fires.
    /// Returns once every spawned task has wound down.
    pub async fn run(self, mut events: impl EventSource) -> std::io::Result<()> {
        let gossip = GossipEngine::<TcpLineGossipTransport>::new(
            self.config.gossip_addr.clone(),
            self.config.node_name.clone(),
            self.peer_view.clone(),
            self.metrics.peer_updates_total.clone(),
        );
        let gossip_shutdown = self.shutdown.clone();
        let gossip_handle = tokio::spawn(gossip.run(gossip_shutdown));

        let metrics = self.metrics.clone();
        let metrics_addr: std::net::SocketAddr =
            format!("0.0.0.0:{}", self.config.metrics_port).parse().expect("valid socket addr");
        let metrics_shutdown = self.shutdown.clone();
        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics.serve(metrics_addr, async move { metrics_shutdown.cancelled().await }).await {
                log::error!("metrics server exited: {e}");
            }
        });

        let cache = self.cache.clone();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                maybe_event = events.next() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event, &cache).await,
                        None => break,
                    }
                }
            }
        }

        self.shutdown.cancel();
        let _ = gossip_handle.await;
        let _ = metrics_handle.await;
        Ok(())
    }

    async fn handle_event(&self, event: AgentEvent, cache: &DesiredStateCache) {
        match event {
            AgentEvent::PodGone(pod_gone) => match self.bidder.handle_pod_gone(&pod_gone).await {
                Ok(outcome) => log::debug!(
                    "agent: pod-gone {}/{} resolved as {outcome:?}",
                    pod_gone.namespace,
                    pod_gone.name
                ),
                Err(e) => log::error!(
                    "agent: pod-gone {}/{} failed: {e}",
                    pod_gone.namespace,
                    pod_gone.name
                ),
            },
            AgentEvent::ReplicaSetObserved(rs) => {
                let record: ReplicaSetRecord = rs.into();
                if let Err(e) = cache.save(&record).await {
                    log::error!("agent: failed to persist replica-set {}: {e}", record.uid);
                }
            }
        }
    }
}

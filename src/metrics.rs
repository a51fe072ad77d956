//! Metrics Server — the read-only Prometheus scrape surface.
//!
//! Built on an `axum` router backed by the `prometheus` crate's
//! registry/encoder, alongside the other background tasks the agent runs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),
}

/// The three counters/histogram the core touches, plus the registry that
/// renders them for scraping.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub restore_latency_seconds: Histogram,
    pub bind_conflicts_total: IntCounter,
    pub peer_updates_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let restore_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "restore_latency_seconds",
                "Wall-clock seconds from pod-loss event receipt to a successful bind",
            )
            .buckets(vec![0.05, 0.1, 0.2, 0.3, 0.5, 1.0, 2.0, 5.0]),
        )?;
        registry.register(Box::new(restore_latency_seconds.clone()))?;

        let bind_conflicts_total =
            IntCounter::new("bind_conflicts_total", "Number of binds that lost a race (HTTP 409)")?;
        registry.register(Box::new(bind_conflicts_total.clone()))?;

        let peer_updates_total = IntCounter::new(
            "peer_updates_total",
            "Number of accepted peer free-CPU gossip updates",
        )?;
        registry.register(Box::new(peer_updates_total.clone()))?;

        Ok(Metrics {
            registry: Arc::new(registry),
            restore_latency_seconds,
            bind_conflicts_total,
            peer_updates_total,
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(serve_metrics))
            .with_state(self.clone())
    }

    /// Binds and serves the metrics router until `shutdown` resolves.
    pub async fn serve(
        &self,
        addr: SocketAddr,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("metrics: listening on {addr}");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

async fn serve_metrics(State(metrics): State<Metrics>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = metrics.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        log::warn!("metrics: encode failed: {e}");
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    let body = String::from_utf8(buf).unwrap_or_default();
    (axum::http::StatusCode::OK, body)
}

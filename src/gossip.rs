//! Gossip Engine — ingress/egress against the local gossip-transport
//! endpoint.
//!
//! The transport itself (a Serf-class sidecar delivering best-effort
//! broadcast of small JSON payloads among named peers) is out of scope; this
//! module adapts it behind `GossipTransport`, a newline-delimited
//! JSON-over-TCP connection to `GOSSIP_ADDR`, the shape closest to the
//! source's local RPC socket to its gossip sidecar. Swapping in a real
//! sidecar's wire protocol only requires a new `GossipTransport` impl.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::peer_view::PeerView;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const EGRESS_INTERVAL: Duration = Duration::from_secs(2);
const EVENT_FREE_CPU: &str = "free_cpu";

#[derive(Debug, Serialize, Deserialize)]
struct GossipEvent {
    event: String,
    #[serde(default)]
    src: String,
    payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FreeCpuPayload {
    free_cpu: u64,
}

/// A single duplex connection to the local gossip endpoint. Split into
/// newline-delimited read/write halves so ingress and egress never block
/// each other on the same socket.
#[async_trait::async_trait]
pub trait GossipTransport: Send {
    async fn connect(addr: &str) -> std::io::Result<Self>
    where
        Self: Sized;

    /// Next complete line, or `Ok(None)` on a clean EOF (peer closed).
    async fn recv_line(&mut self) -> std::io::Result<Option<String>>;

    async fn send_line(&mut self, line: &str) -> std::io::Result<()>;
}

pub struct TcpLineGossipTransport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

#[async_trait::async_trait]
impl GossipTransport for TcpLineGossipTransport {
    async fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(TcpLineGossipTransport {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    async fn recv_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}

/// Long-running ingress+egress task. Reconnects indefinitely on failure;
/// never tears down the process.
pub struct GossipEngine<T: GossipTransport> {
    addr: String,
    self_id: String,
    peer_view: PeerView,
    peer_updates_total: prometheus::IntCounter,
    _transport: std::marker::PhantomData<T>,
}

impl<T: GossipTransport> GossipEngine<T> {
    pub fn new(
        addr: impl Into<String>,
        self_id: impl Into<String>,
        peer_view: PeerView,
        peer_updates_total: prometheus::IntCounter,
    ) -> Self {
        GossipEngine {
            addr: addr.into(),
            self_id: self_id.into(),
            peer_view,
            peer_updates_total,
            _transport: std::marker::PhantomData,
        }
    }

    /// Runs until `shutdown` is cancelled. A dropped/errored connection is
    /// logged at warn level, followed by a cancellable back-off sleep, then
    /// an unconditional retry.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let transport = match T::connect(&self.addr).await {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("gossip: connect to {} failed: {e}", self.addr);
                    if wait_or_shutdown(RECONNECT_BACKOFF, &shutdown).await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            match self.run_session(transport, &shutdown).await {
                Ok(()) => return,
                Err(e) => {
                    log::warn!("gossip: session on {} ended: {e}", self.addr);
                    if wait_or_shutdown(RECONNECT_BACKOFF, &shutdown).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Runs one connected session until it errors, the peer disconnects, or
    /// shutdown is requested (`Ok(())`).
    async fn run_session(
        &self,
        mut transport: T,
        shutdown: &CancellationToken,
    ) -> std::io::Result<()> {
        let mut egress_tick = tokio::time::interval(EGRESS_INTERVAL);
        egress_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Ok(()),

                line = transport.recv_line() => {
                    match line? {
                        Some(raw) => self.handle_ingress_line(&raw).await,
                        None => return Ok(()),
                    }
                }

                _ = egress_tick.tick() => {
                    self.broadcast_self(&mut transport).await?;
                }
            }
        }
    }

    async fn handle_ingress_line(&self, raw: &str) {
        let event: GossipEvent = match serde_json::from_str(raw) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("gossip: malformed event, ignored: {e}");
                return;
            }
        };

        if event.event != EVENT_FREE_CPU {
            return;
        }

        let payload: FreeCpuPayload = match serde_json::from_value(event.payload) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("gossip: malformed free_cpu payload from {}, ignored: {e}", event.src);
                return;
            }
        };

        self.peer_view.update(event.src, payload.free_cpu).await;
        self.peer_updates_total.inc();
    }

    /// Coalesces any number of local capacity changes since the last tick
    /// into a single broadcast of the current value.
    async fn broadcast_self(&self, transport: &mut T) -> std::io::Result<()> {
        let free_cpu = self.peer_view.self_cpu(&self.self_id).await;
        let event = GossipEvent {
            event: EVENT_FREE_CPU.to_string(),
            src: self.self_id.clone(),
            payload: serde_json::to_value(FreeCpuPayload { free_cpu }).unwrap(),
        };
        let line = serde_json::to_string(&event).expect("GossipEvent always serializes");
        transport.send_line(&line).await
    }
}

/// Sleeps for `dur`, or returns `Err(())` early if `shutdown` fires first.
async fn wait_or_shutdown(dur: Duration, shutdown: &CancellationToken) -> Result<(), ()> {
    tokio::select! {
        _ = tokio::time::sleep(dur) => Ok(()),
        _ = shutdown.cancelled() => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct MockTransport {
        inbound: Arc<Mutex<VecDeque<String>>>,
        outbound: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl GossipTransport for MockTransport {
        async fn connect(_addr: &str) -> std::io::Result<Self> {
            unreachable!("test constructs MockTransport directly")
        }

        async fn recv_line(&mut self) -> std::io::Result<Option<String>> {
            Ok(self.inbound.lock().unwrap().pop_front())
        }

        async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
            self.outbound.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn accepted_free_cpu_event_updates_peer_view_and_counter() {
        let peer_view = PeerView::new();
        let counter = prometheus::IntCounter::new("t_peer_updates", "test").unwrap();
        let engine = GossipEngine::<MockTransport>::new(
            "unused:0",
            "self-node",
            peer_view.clone(),
            counter.clone(),
        );

        let line = serde_json::json!({
            "event": "free_cpu",
            "src": "peer-a",
            "payload": {"free_cpu": 7}
        })
        .to_string();

        engine.handle_ingress_line(&line).await;

        assert_eq!(peer_view.snapshot().await.get("peer-a"), Some(&7));
        assert_eq!(counter.get(), 1);
    }

    #[tokio::test]
    async fn unknown_event_name_is_ignored() {
        let peer_view = PeerView::new();
        let counter = prometheus::IntCounter::new("t_peer_updates2", "test").unwrap();
        let engine =
            GossipEngine::<MockTransport>::new("unused:0", "self-node", peer_view.clone(), counter.clone());

        let line = serde_json::json!({"event": "node_left", "src": "peer-a", "payload": {}}).to_string();
        engine.handle_ingress_line(&line).await;

        assert!(peer_view.snapshot().await.is_empty());
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_ignored_not_fatal() {
        let peer_view = PeerView::new();
        let counter = prometheus::IntCounter::new("t_peer_updates3", "test").unwrap();
        let engine =
            GossipEngine::<MockTransport>::new("unused:0", "self-node", peer_view.clone(), counter.clone());

        let line = serde_json::json!({"event": "free_cpu", "src": "peer-a", "payload": {"free_cpu": "not-a-number"}})
            .to_string();
        engine.handle_ingress_line(&line).await;

        assert!(peer_view.snapshot().await.is_empty());
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn broadcast_self_sends_current_value() {
        let peer_view = PeerView::new();
        peer_view.update("self-node", 5).await;
        let counter = prometheus::IntCounter::new("t_peer_updates4", "test").unwrap();
        let engine =
            GossipEngine::<MockTransport>::new("unused:0", "self-node", peer_view, counter);

        let mut transport = MockTransport {
            inbound: Arc::new(Mutex::new(VecDeque::new())),
            outbound: Arc::new(Mutex::new(Vec::new())),
        };
        engine.broadcast_self(&mut transport).await.unwrap();

        let sent = transport.outbound.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("\"free_cpu\":5"));
        assert!(sent[0].contains("\"src\":\"self-node\""));
    }
}

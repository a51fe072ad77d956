//! Orchestrator-agnostic input events.
//!
//! The real deployment's watch-stream framework is out of scope; this module
//! is the narrow seam it must be adapted through. Nothing downstream of
//! `AgentEvent` references any orchestrator-framework type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pod that was hosted on this node and has disappeared from the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodGone {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

/// A replica-set create/update observed on the watch stream.
#[derive(Debug, Clone)]
pub struct ReplicaSetObserved {
    pub uid: String,
    /// Opaque spec blob, serialized as raw JSON to avoid coupling to the
    /// orchestrator's schema evolution.
    pub spec: Value,
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    PodGone(PodGone),
    ReplicaSetObserved(ReplicaSetObserved),
}

/// A source of `AgentEvent`s. A real integration adapts a specific watch
/// framework's delivery mechanism to this trait outside the core crate.
#[async_trait::async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> Option<AgentEvent>;
}

/// Minimal in-memory event source used by tests and by any harness driving
/// the agent without a live orchestrator.
#[derive(Default)]
pub struct InMemoryEventSource {
    events: std::collections::VecDeque<AgentEvent>,
}

impl InMemoryEventSource {
    pub fn new(events: Vec<AgentEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }

    pub fn push(&mut self, event: AgentEvent) {
        self.events.push_back(event);
    }
}

#[async_trait::async_trait]
impl EventSource for InMemoryEventSource {
    async fn next(&mut self) -> Option<AgentEvent> {
        self.events.pop_front()
    }
}

/// Serializable mirror of a replica-set spec record, used only for the cache
/// round-trip (`metadata.uid` + opaque `spec`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaSetRecord {
    pub uid: String,
    pub spec: Value,
}

impl From<ReplicaSetObserved> for ReplicaSetRecord {
    fn from(ev: ReplicaSetObserved) -> Self {
        ReplicaSetRecord {
            uid: ev.uid,
            spec: ev.spec,
        }
    }
}

//! Control-plane HTTP client — the thin REST wrapper the Bidder binds pods
//! through.
//!
//! The real cluster's binding sub-resource semantics (optimistic create,
//! 409 on conflict) are the whole point of the decentralized bidding
//! protocol; this client exposes exactly the one call that matters and
//! nothing else, translated to plain `reqwest` calls the way the source's
//! thin Kubernetes client wrapper does.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("control plane request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("control plane returned unexpected status {0}")]
    UnexpectedStatus(StatusCode),
}

/// The outcome of an attempted bind. `Conflict` is not an error — it is the
/// expected shape of losing a race against another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    Conflict,
}

#[derive(Debug, Serialize)]
struct BindTarget<'a> {
    kind: &'a str,
    #[serde(rename = "apiVersion")]
    api_version: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct BindMetadata<'a> {
    name: &'a str,
    namespace: &'a str,
}

/// Mirrors a `V1Binding`: target node plus the metadata identifying which
/// pod is being bound.
#[derive(Debug, Serialize)]
struct BindRequest<'a> {
    target: BindTarget<'a>,
    metadata: BindMetadata<'a>,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    control_plane_url: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(control_plane_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .expect("reqwest client build is infallible for this configuration");

        ApiClient {
            client,
            control_plane_url: control_plane_url.into(),
            timeout,
        }
    }

    /// Cheap liveness probe against the control plane's list-resources
    /// endpoint. `Ok(true)` for any 2xx response within the client's
    /// configured timeout.
    pub async fn probe(&self) -> Result<bool, ApiError> {
        let url = format!("{}/api/v1", self.control_plane_url.trim_end_matches('/'));
        let resp = self.client.get(&url).timeout(self.timeout).send().await?;
        Ok(resp.status().is_success())
    }

    /// Optimistically bind `namespace/pod_name` to `node_name` via the
    /// binding sub-resource. The control plane is the single arbiter: a 409
    /// means another node already won, which is the mechanism that keeps two
    /// racing bidders from double-scheduling the same pod.
    pub async fn bind(
        &self,
        namespace: &str,
        pod_name: &str,
        node_name: &str,
    ) -> Result<BindOutcome, ApiError> {
        let url = format!(
            "{}/api/v1/namespaces/{namespace}/pods/{pod_name}/binding",
            self.control_plane_url.trim_end_matches('/')
        );

        let body = BindRequest {
            target: BindTarget {
                kind: "Node",
                api_version: "v1",
                name: node_name,
            },
            metadata: BindMetadata {
                name: pod_name,
                namespace,
            },
        };

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(BindOutcome::Bound),
            StatusCode::CONFLICT => Ok(BindOutcome::Conflict),
            other => Err(ApiError::UnexpectedStatus(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_request_serializes_structured_target_and_metadata() {
        let req = BindRequest {
            target: BindTarget {
                kind: "Node",
                api_version: "v1",
                name: "node-b",
            },
            metadata: BindMetadata {
                name: "pod-a",
                namespace: "default",
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"target":{"kind":"Node","apiVersion":"v1","name":"node-b"},"metadata":{"name":"pod-a","namespace":"default"}}"#
        );
    }

    #[tokio::test]
    async fn unreachable_control_plane_surfaces_transport_error() {
        let client = ApiClient::new("http://127.0.0.1:1", Duration::from_millis(200));
        let result = client.bind("default", "pod-a", "node-a").await;
        assert!(matches!(result, Err(ApiError::Transport(_))));
    }
}

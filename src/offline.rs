//! Offline Detector — the gate that decides whether this node is allowed to
//! act unilaterally.
//!
//! Mirrors the source's `is_offline()`: a bare reachability probe against the
//! control plane, any failure (timeout, connection refused, TLS error, non-2xx)
//! treated as "offline". There is no retry and no hysteresis — a single failed
//! probe is sufficient, matching the original's stated simplicity. The probe
//! timeout itself lives on the shared `ApiClient` (from `CONTROL_PLANE_TIMEOUT_MS`,
//! default 1s), so every control-plane call in the agent shares one deadline policy.

use crate::api_client::ApiClient;

#[derive(Clone)]
pub struct OfflineDetector {
    api_client: ApiClient,
}

impl OfflineDetector {
    pub fn new(api_client: ApiClient) -> Self {
        OfflineDetector { api_client }
    }

    /// `true` if the control plane could not be reached, for any reason.
    /// Never propagates an error — an unreachable control plane is precisely
    /// the condition this exists to detect.
    pub async fn is_offline(&self) -> bool {
        match self.api_client.probe().await {
            Ok(reachable) => !reachable,
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unreachable_host_reports_offline() {
        // Port 1 is reserved and nothing will ever answer on it locally.
        let client = ApiClient::new("http://127.0.0.1:1", Duration::from_millis(200));
        let detector = OfflineDetector::new(client);
        assert!(detector.is_offline().await);
    }

    #[tokio::test]
    async fn malformed_probe_url_is_still_offline() {
        let client = ApiClient::new("not-a-valid-host", Duration::from_millis(200));
        let detector = OfflineDetector::new(client);
        assert!(detector.is_offline().await);
    }
}

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Reachability {
    Reachable { status: u16 },
    Unreachable { reason: String },
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable { .. })
    }
}

/// Best-effort liveness check against the endpoint base. Any HTTP answer,
/// whatever its status, means the process is up.
pub async fn probe(http: &Client, endpoint_base: &str, timeout_ms: u64) -> Reachability {
    let result = http
        .get(endpoint_base)
        .timeout(Duration::from_millis(timeout_ms))
        .send()
        .await;

    match result {
        Ok(response) => {
            let status = response.status().as_u16();
            debug!(endpoint = endpoint_base, status, "automation endpoint reachable");
            Reachability::Reachable { status }
        }
        Err(err) => {
            debug!(endpoint = endpoint_base, error = %err, "automation endpoint unreachable");
            Reachability::Unreachable {
                reason: err.to_string(),
            }
        }
    }
}

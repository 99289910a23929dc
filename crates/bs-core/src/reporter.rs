// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Node status reports sent to the tsuru API.

use crate::services::StatusReport;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const STATUS_PATH: &str = "/node/status";
const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to send status report: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Status report rejected with {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Payload posted on every status report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeStatus {
    pub hostname: String,
    pub addrs: Vec<String>,
    pub uptime_secs: u64,
}

/// [`StatusReport`] that posts the node status to the tsuru API.
pub struct TsuruStatusReporter {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    hostname: String,
    addrs: Vec<String>,
    started_at: Instant,
}

impl TsuruStatusReporter {
    /// `addrs` are the addresses this node announces (its syslog listener).
    pub fn new(endpoint: &str, token: &str, addrs: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            hostname: local_hostname(),
            addrs,
            started_at: Instant::now(),
        }
    }

    pub fn node_status(&self) -> NodeStatus {
        NodeStatus {
            hostname: self.hostname.clone(),
            addrs: self.addrs.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    async fn send(&self, status: &NodeStatus) -> Result<(), ReportError> {
        let response = self
            .client
            .post(format!("{}{STATUS_PATH}", self.endpoint))
            .header(AUTHORIZATION, format!("bearer {}", self.token))
            .timeout(REPORT_TIMEOUT)
            .json(status)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ReportError::Status { status, body })
    }
}

#[async_trait]
impl StatusReport for TsuruStatusReporter {
    async fn report(&self) {
        if self.endpoint.is_empty() {
            debug!("STATUS | No tsuru endpoint configured, skipping status report");
            return;
        }
        let status = self.node_status();
        match self.send(&status).await {
            Ok(()) => debug!("STATUS | Reported status for {}", status.hostname),
            Err(e) => error!("STATUS | {e}"),
        }
    }
}

const HOSTNAME_VAR: &str = "HOSTNAME";
const FALLBACK_HOSTNAME: &str = "localhost";

fn local_hostname() -> String {
    resolve_hostname(std::env::var(HOSTNAME_VAR).ok())
}

/// Picks the name this node announces: `HOSTNAME` when exported, then the
/// system hostname, then [`FALLBACK_HOSTNAME`].
fn resolve_hostname(from_env: Option<String>) -> String {
    if let Some(hostname) = from_env.filter(|name| !name.is_empty()) {
        return hostname;
    }

    if let Some(hostname) = system_hostname() {
        return hostname;
    }

    warn!("STATUS | Could not determine hostname, using '{FALLBACK_HOSTNAME}'");
    FALLBACK_HOSTNAME.to_string()
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname
            .into_string()
            .ok()
            .filter(|name| !name.is_empty()),
        Err(e) => {
            warn!("STATUS | Failed to get system hostname: {e}");
            None
        }
    }
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    None
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Container CPU metrics runner.
//!
//! Samples cgroup CPU usage and limit on a fixed interval and ships them as
//! statsd gauges until stopped.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod cpu;

use async_trait::async_trait;
use bs_core::{MetricsRunner, ServiceError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use cpu::CgroupPaths;

pub const CPU_USAGE_METRIC: &str = "bs.cpu.usage";
pub const CPU_LIMIT_METRIC: &str = "bs.cpu.limit";

/// Ships cgroup CPU usage and limit gauges to a statsd server.
///
/// Started once by the supervisor. [`MetricsRunner::stop`] cancels the
/// sampling loop and may be called any number of times, including when
/// `start` failed.
pub struct CgroupMetricsRunner {
    statsd_address: String,
    interval: Duration,
    paths: CgroupPaths,
    started: AtomicBool,
    cancel_token: CancellationToken,
}

impl CgroupMetricsRunner {
    #[must_use]
    pub fn new(statsd_address: String, interval: Duration) -> Self {
        Self {
            statsd_address,
            interval,
            paths: CgroupPaths::default(),
            started: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_paths(mut self, paths: CgroupPaths) -> Self {
        self.paths = paths;
        self
    }
}

#[async_trait]
impl MetricsRunner for CgroupMetricsRunner {
    async fn start(&self) -> Result<(), ServiceError> {
        if cpu::read_cpu_usage(&self.paths.cpu_usage).is_none() {
            return Err(ServiceError::Unavailable(format!(
                "cannot read CPU usage from {}",
                self.paths.cpu_usage.display()
            )));
        }
        let target = tokio::net::lookup_host(self.statsd_address.as_str())
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ServiceError::InvalidAddress(self.statsd_address.clone()))?;
        let bind_address = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_address).await?;

        // Only a runner that got this far counts as started
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::Unavailable(
                "metrics runner already started".to_string(),
            ));
        }

        info!(
            "METRICS | Sending CPU metrics to {target} every {}s",
            self.interval.as_secs()
        );
        tokio::spawn(run(
            socket,
            target,
            self.paths.clone(),
            self.interval,
            self.cancel_token.clone(),
        ));
        Ok(())
    }

    fn stop(&self) {
        self.cancel_token.cancel();
    }
}

async fn run(
    socket: UdpSocket,
    target: SocketAddr,
    paths: CgroupPaths,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut sampler = Sampler::default();
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!("METRICS | Stopped");
                break;
            }
            () = sleep(interval) => {
                let Some(stats) = cpu::read_cpu_stats(&paths) else {
                    warn!("METRICS | Unable to read cgroup CPU stats, skipping");
                    continue;
                };
                let payload = sampler.payload(&stats, Instant::now());
                if let Err(e) = socket.send_to(payload.as_bytes(), target).await {
                    warn!("METRICS | Failed to send CPU metrics to {target}: {e}");
                }
            }
        }
    }
}

/// Turns cumulative usage into a rate between consecutive samples.
#[derive(Default)]
struct Sampler {
    previous: Option<(u64, Instant)>,
}

impl Sampler {
    /// Usage is reported in percent of one core, 0 on the first sample.
    fn payload(&mut self, stats: &cpu::CpuStats, now: Instant) -> String {
        let usage_pct = match self.previous {
            Some((total, at)) => {
                let elapsed = now.duration_since(at).as_nanos() as f64;
                if elapsed > 0.0 {
                    100.0 * stats.total.saturating_sub(total) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.previous = Some((stats.total, now));

        format!(
            "{CPU_USAGE_METRIC}:{usage_pct}|g\n{CPU_LIMIT_METRIC}:{}|g",
            stats.limit_pct
        )
    }
}

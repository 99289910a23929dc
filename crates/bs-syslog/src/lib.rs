// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog forwarding service.
//!
//! Listens for log records on a UDP socket and relays every datagram,
//! unchanged, to each configured forward address. Once started the service
//! runs for the lifetime of the process.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use async_trait::async_trait;
use bs_core::{LogForwarder, ServiceError};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace};

// Largest payload a single UDP datagram can carry
const BUFFER_SIZE: usize = 65_536;

const UDP_SCHEME: &str = "udp://";

/// Configuration for the syslog forwarder
#[derive(Debug, Clone)]
pub struct SyslogConfig {
    /// Address to bind the UDP listener to (e.g., "0.0.0.0:1514")
    pub listen_address: String,
    /// Addresses every received record is relayed to
    pub forward_addresses: Vec<String>,
}

pub struct SyslogForwarder {
    config: SyslogConfig,
    local_addr: Option<SocketAddr>,
}

impl SyslogForwarder {
    #[must_use]
    pub fn new(config: SyslogConfig) -> Self {
        Self {
            config,
            local_addr: None,
        }
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl LogForwarder for SyslogForwarder {
    async fn start(&mut self) -> Result<(), ServiceError> {
        let mut targets = Vec::with_capacity(self.config.forward_addresses.len());
        for address in &self.config.forward_addresses {
            targets.push(resolve(address).await?);
        }
        let relay = Relay::bind(&targets).await?;

        let listen_address = strip_scheme(&self.config.listen_address);
        let socket = UdpSocket::bind(listen_address)
            .await
            .map_err(|source| ServiceError::Bind {
                address: listen_address.to_string(),
                source,
            })?;
        let local_addr = socket.local_addr()?;
        self.local_addr = Some(local_addr);

        info!(
            "SYSLOG | Listening on {local_addr}, forwarding to {} address(es)",
            targets.len()
        );
        tokio::spawn(spin(socket, relay, targets));
        Ok(())
    }
}

/// Receive loop. Runs until the runtime shuts down.
async fn spin(socket: UdpSocket, relay: Relay, targets: Vec<SocketAddr>) {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((amt, src)) => {
                trace!("SYSLOG | Received {amt} bytes from {src}");
                relay.forward(&buf[..amt], &targets).await;
            }
            Err(e) => error!("SYSLOG | Failed to receive log record: {e}"),
        }
    }
}

/// Outbound sockets, one per address family in use.
struct Relay {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
}

impl Relay {
    async fn bind(targets: &[SocketAddr]) -> Result<Self, ServiceError> {
        let v4 = if targets.iter().any(SocketAddr::is_ipv4) {
            Some(UdpSocket::bind("0.0.0.0:0").await?)
        } else {
            None
        };
        let v6 = if targets.iter().any(SocketAddr::is_ipv6) {
            Some(UdpSocket::bind("[::]:0").await?)
        } else {
            None
        };
        Ok(Self { v4, v6 })
    }

    async fn forward(&self, record: &[u8], targets: &[SocketAddr]) {
        for target in targets {
            let socket = if target.is_ipv4() {
                self.v4.as_ref()
            } else {
                self.v6.as_ref()
            };
            let Some(socket) = socket else {
                continue;
            };
            if let Err(e) = socket.send_to(record, target).await {
                debug!("SYSLOG | Failed to forward record to {target}: {e}");
            }
        }
    }
}

fn strip_scheme(address: &str) -> &str {
    let address = address.trim();
    address.strip_prefix(UDP_SCHEME).unwrap_or(address)
}

/// Resolves a forward address, accepting an optional `udp://` scheme.
async fn resolve(address: &str) -> Result<SocketAddr, ServiceError> {
    let host_port = strip_scheme(address);
    tokio::net::lookup_host(host_port)
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ServiceError::InvalidAddress(address.to_string()))
}

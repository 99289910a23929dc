// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration, resolved once from the process environment.
//!
//! The resulting [`Config`] is an immutable snapshot: it is built at startup,
//! wrapped in an `Arc` and handed to every component that needs it. Malformed
//! values never abort startup; they fall back to a default and emit a warning.

use std::env;
use std::time::Duration;
use tracing::warn;

/// Interval, in seconds, used when a configured interval is missing or invalid.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SYSLOG_LISTEN_ADDRESS: &str = "0.0.0.0:1514";
pub const DEFAULT_STATSD_ADDRESS: &str = "127.0.0.1:8125";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub const TSURU_ENDPOINT_VAR: &str = "TSURU_ENDPOINT";
pub const TSURU_TOKEN_VAR: &str = "TSURU_TOKEN";
pub const STATUS_INTERVAL_VAR: &str = "STATUS_INTERVAL";
pub const METRICS_INTERVAL_VAR: &str = "METRICS_INTERVAL";
pub const SYSLOG_LISTEN_ADDRESS_VAR: &str = "SYSLOG_LISTEN_ADDRESS";
pub const SYSLOG_FORWARD_ADDRESSES_VAR: &str = "SYSLOG_FORWARD_ADDRESSES";
pub const STATSD_ADDRESS_VAR: &str = "STATSD_ADDRESS";
pub const LOG_LEVEL_VAR: &str = "BS_LOG_LEVEL";

/// Resolved agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the tsuru API receiving node status reports
    pub tsuru_endpoint: String,
    /// Token sent along with status reports
    pub tsuru_token: String,
    /// How often the node status is reported
    pub status_interval: Duration,
    /// How often metrics are sampled and shipped
    pub metrics_interval: Duration,
    /// UDP address the log forwarder listens on
    pub syslog_listen_address: String,
    /// UDP addresses every received log record is relayed to
    pub syslog_forward_addresses: Vec<String>,
    /// UDP address of the statsd server receiving metrics
    pub statsd_address: String,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tsuru_endpoint: String::new(),
            tsuru_token: String::new(),
            status_interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            metrics_interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            syslog_listen_address: DEFAULT_SYSLOG_LISTEN_ADDRESS.to_string(),
            syslog_forward_addresses: Vec::new(),
            statsd_address: DEFAULT_STATSD_ADDRESS.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());

        let status_interval =
            parse_interval(STATUS_INTERVAL_VAR, lookup(STATUS_INTERVAL_VAR).as_deref());
        let metrics_interval =
            parse_interval(METRICS_INTERVAL_VAR, lookup(METRICS_INTERVAL_VAR).as_deref());

        Self {
            tsuru_endpoint: lookup(TSURU_ENDPOINT_VAR).unwrap_or_default(),
            tsuru_token: lookup(TSURU_TOKEN_VAR).unwrap_or_default(),
            status_interval,
            metrics_interval,
            syslog_listen_address: non_empty(SYSLOG_LISTEN_ADDRESS_VAR)
                .unwrap_or_else(|| DEFAULT_SYSLOG_LISTEN_ADDRESS.to_string()),
            syslog_forward_addresses: parse_forward_addresses(
                lookup(SYSLOG_FORWARD_ADDRESSES_VAR).as_deref(),
            ),
            statsd_address: non_empty(STATSD_ADDRESS_VAR)
                .unwrap_or_else(|| DEFAULT_STATSD_ADDRESS.to_string()),
            log_level: parse_log_level(lookup(LOG_LEVEL_VAR).as_deref()),
        }
    }
}

/// Parses an interval expressed in whole seconds.
///
/// Anything other than a positive integer (missing, non-numeric, padded with
/// whitespace, zero or negative) yields [`DEFAULT_INTERVAL_SECS`] and a warning naming `var`.
pub fn parse_interval(var: &str, raw: Option<&str>) -> Duration {
    let value = raw.unwrap_or_default();
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            warn!(
                "invalid {var} {value:?}. Using the default value of {DEFAULT_INTERVAL_SECS} seconds"
            );
            Duration::from_secs(DEFAULT_INTERVAL_SECS)
        }
    }
}

/// Splits a comma-separated address list, dropping blank entries.
pub fn parse_forward_addresses(raw: Option<&str>) -> Vec<String> {
    raw.map(|val| {
        val.split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Normalizes a log level, falling back to [`DEFAULT_LOG_LEVEL`].
pub fn parse_log_level(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return DEFAULT_LOG_LEVEL.to_string();
    };
    let level = raw.trim().to_lowercase();
    if VALID_LOG_LEVELS.contains(&level.as_str()) {
        level
    } else {
        warn!("invalid {LOG_LEVEL_VAR} {raw:?}. Using the default level {DEFAULT_LOG_LEVEL}");
        DEFAULT_LOG_LEVEL.to_string()
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process::ExitCode, sync::Arc};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use bs_core::{
    config::{DEFAULT_LOG_LEVEL, LOG_LEVEL_VAR, VALID_LOG_LEVELS},
    logger::Formatter, reporter::TsuruStatusReporter, Config, Supervisor,
};
use bs_metrics::CgroupMetricsRunner;
use bs_syslog::{SyslogConfig, SyslogForwarder};

const NOISY_CRATES: &str = "h2=off,hyper=off,reqwest=off,rustls=off";

#[tokio::main]
pub async fn main() -> ExitCode {
    // An unknown level is reported once the configuration is loaded
    let log_level = env::var(LOG_LEVEL_VAR)
        .map(|val| val.trim().to_lowercase())
        .ok()
        .filter(|val| VALID_LOG_LEVELS.contains(&val.as_str()))
        .unwrap_or(DEFAULT_LOG_LEVEL.to_string());

    let env_filter = EnvFilter::try_new(format!("{NOISY_CRATES},{log_level}"))
        .unwrap_or_else(|_| EnvFilter::new(format!("{NOISY_CRATES},{DEFAULT_LOG_LEVEL}")));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(Formatter)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    debug!("Logging subsystem enabled");

    let config = Arc::new(Config::from_env());

    let forwarder = SyslogForwarder::new(SyslogConfig {
        listen_address: config.syslog_listen_address.clone(),
        forward_addresses: config.syslog_forward_addresses.clone(),
    });
    let metrics = Arc::new(CgroupMetricsRunner::new(
        config.statsd_address.clone(),
        config.metrics_interval,
    ));
    let reporter = Arc::new(TsuruStatusReporter::new(
        &config.tsuru_endpoint,
        &config.tsuru_token,
        vec![config.syslog_listen_address.clone()],
    ));

    info!("AGENT | Starting");
    match Supervisor::new(config, Box::new(forwarder), metrics, reporter)
        .run()
        .await
    {
        Ok(()) => {
            info!("AGENT | Stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("AGENT | {e}");
            ExitCode::FAILURE
        }
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::Config;
use crate::error::SupervisorError;
use crate::services::{LogForwarder, MetricsRunner, StatusReport};
use crate::signals::{SignalListener, SignalSource, TERMINATION_SIGNALS};
use crate::status::StatusReporter;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Lifecycle state of the supervisor. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Services are starting up.
    Starting,
    /// Services are running and the signal listener is armed.
    Running,
    /// A termination signal arrived; waiting for the status reporter to stop.
    ShuttingDown,
    /// The status reporter confirmed it stopped.
    Stopped,
}

/// Owns the lifecycle of the services hosted by the agent.
///
/// Startup order is fixed: log forwarder, metrics runner, status reporter,
/// signal listener. A forwarder failure is fatal, a metrics runner failure
/// is logged and tolerated. [`Supervisor::run`] returns once the status
/// reporter has acknowledged the shutdown; the log forwarder is left running
/// and the metrics runner is only asked to stop.
pub struct Supervisor {
    config: Arc<Config>,
    forwarder: Box<dyn LogForwarder>,
    metrics: Arc<dyn MetricsRunner>,
    reporter: Arc<dyn StatusReport>,
    signal_source: SignalSource,
    state_tx: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        forwarder: Box<dyn LogForwarder>,
        metrics: Arc<dyn MetricsRunner>,
        reporter: Arc<dyn StatusReport>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Starting);
        Self {
            config,
            forwarder,
            metrics,
            reporter,
            signal_source: SignalSource::Os,
            state_tx,
        }
    }

    /// Replaces the OS as the source of termination signals.
    #[must_use]
    pub fn with_signal_source(mut self, source: SignalSource) -> Self {
        self.signal_source = source;
        self
    }

    /// Get a receiver for state updates.
    pub fn state_receiver(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Starts every service and blocks until an orderly shutdown completes.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let Supervisor {
            config,
            mut forwarder,
            metrics,
            reporter,
            signal_source,
            state_tx,
        } = self;

        debug!("SUPERVISOR | Starting log forwarder");
        forwarder
            .start()
            .await
            .map_err(SupervisorError::ForwarderStart)?;

        debug!("SUPERVISOR | Starting metrics runner");
        if let Err(e) = metrics.start().await {
            error!("SUPERVISOR | Unable to initialize metrics runner: {e}");
        }

        let (abort_reporter, reporter_ended) =
            StatusReporter::start(config.status_interval, reporter);

        let registered = match SignalListener::register(signal_source, &TERMINATION_SIGNALS) {
            Ok(registered) => registered,
            Err(e) => {
                abort_reporter.abort();
                metrics.stop();
                reporter_ended.wait().await;
                return Err(SupervisorError::SignalHandler(e));
            }
        };

        let state_tx = Arc::new(state_tx);
        let callback_state = Arc::clone(&state_tx);
        let callback_metrics = Arc::clone(&metrics);
        let _listener = registered.on_first(move |signal| {
            info!("SUPERVISOR | Shutting down on {signal}");
            callback_state.send_replace(SupervisorState::ShuttingDown);
            abort_reporter.abort();
            callback_metrics.stop();
        });

        // A buffered signal may already have moved us to ShuttingDown
        state_tx.send_if_modified(|state| {
            if *state == SupervisorState::Starting {
                *state = SupervisorState::Running;
                true
            } else {
                false
            }
        });
        info!("SUPERVISOR | Agent running");

        reporter_ended.wait().await;

        state_tx.send_replace(SupervisorState::Stopped);
        info!("SUPERVISOR | Shutdown complete");

        // Keep the forwarder alive until the very end of the run
        drop(forwarder);
        Ok(())
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self-clocked task reporting the node status on a fixed interval.
//!
//! Each cycle races the interval against the abort token, so an abort is
//! observed as soon as the scheduler runs the task instead of after the
//! remainder of the current interval. A report that is already running is
//! not interrupted.
//!
//! Each report runs in its own task so that a panic inside it is logged
//! and the next cycle still happens.
//!
//! When the abort and the interval expiry become ready at the same time,
//! either branch may win: one last report may or may not be issued before
//! the completion signal.

use crate::services::StatusReport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Producer side of the abort indication. Consumed by [`ReporterAbort::abort`].
#[derive(Debug)]
pub struct ReporterAbort {
    token: CancellationToken,
}

impl ReporterAbort {
    /// Asks the reporter to stop. No report starts after the task observes it.
    pub fn abort(self) {
        self.token.cancel();
    }
}

/// Consumer side of the completion signal.
#[derive(Debug)]
pub struct ReporterCompletion {
    rx: oneshot::Receiver<()>,
}

impl ReporterCompletion {
    /// Waits until the reporter task has stopped issuing reports.
    pub async fn wait(self) {
        if self.rx.await.is_err() {
            error!("STATUS | Reporter task ended without signaling completion");
        }
    }
}

/// Periodic status reporting task.
///
/// Built and spawned by [`StatusReporter::start`]; callers only ever hold
/// the returned abort and completion handles.
pub struct StatusReporter {
    interval: Duration,
    reporter: Arc<dyn StatusReport>,
    abort: CancellationToken,
    done: oneshot::Sender<()>,
}

impl StatusReporter {
    /// Spawns the reporter task on the current runtime.
    #[must_use]
    pub fn start(
        interval: Duration,
        reporter: Arc<dyn StatusReport>,
    ) -> (ReporterAbort, ReporterCompletion) {
        let token = CancellationToken::new();
        let (done, rx) = oneshot::channel();

        let task = StatusReporter {
            interval,
            reporter,
            abort: token.clone(),
            done,
        };
        tokio::spawn(task.run());

        (ReporterAbort { token }, ReporterCompletion { rx })
    }

    async fn run(self) {
        debug!("STATUS | Reporting every {:?}", self.interval);
        loop {
            tokio::select! {
                () = self.abort.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {
                    let reporter = Arc::clone(&self.reporter);
                    // A panicking report is logged; the loop keeps going
                    match tokio::spawn(async move { reporter.report().await }).await {
                        Err(e) if e.is_panic() => {
                            error!("STATUS | Status report panicked: {e:?}");
                        }
                        Ok(()) | Err(_) => {}
                    }
                }
            }
        }
        debug!("STATUS | Abort received, reporter stopped");
        // Receiver may already be gone if nobody waits for completion
        let _ = self.done.send(());
    }
}

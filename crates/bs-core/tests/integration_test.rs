// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bs_core::{
    Config, LogForwarder, MetricsRunner, ServiceError, Signal, SignalSource, StatusReport,
    Supervisor, SupervisorError, SupervisorState,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Duration};

#[derive(Default)]
struct FakeForwarder {
    fail: bool,
    started: Arc<AtomicBool>,
}

#[async_trait]
impl LogForwarder for FakeForwarder {
    async fn start(&mut self) -> Result<(), ServiceError> {
        if self.fail {
            return Err(ServiceError::Unavailable("listen address in use".to_string()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeMetrics {
    fail: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

#[async_trait]
impl MetricsRunner for FakeMetrics {
    async fn start(&self) -> Result<(), ServiceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ServiceError::Unavailable("no cgroup".to_string()));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeReport {
    panics: bool,
    reports: AtomicUsize,
}

#[async_trait]
impl StatusReport for FakeReport {
    async fn report(&self) {
        self.reports.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("status endpoint client crashed");
        }
    }
}

struct Harness {
    forwarder_started: Arc<AtomicBool>,
    metrics: Arc<FakeMetrics>,
    report: Arc<FakeReport>,
    signals: mpsc::Sender<Signal>,
    state: watch::Receiver<SupervisorState>,
    supervisor: Supervisor,
}

fn harness(interval_secs: u64, forwarder_fails: bool, metrics_fails: bool) -> Harness {
    harness_with_report(
        interval_secs,
        forwarder_fails,
        metrics_fails,
        FakeReport::default(),
    )
}

fn harness_with_report(
    interval_secs: u64,
    forwarder_fails: bool,
    metrics_fails: bool,
    report: FakeReport,
) -> Harness {
    let config = Arc::new(Config {
        status_interval: Duration::from_secs(interval_secs),
        ..Config::default()
    });
    let forwarder = FakeForwarder {
        fail: forwarder_fails,
        ..FakeForwarder::default()
    };
    let forwarder_started = Arc::clone(&forwarder.started);
    let metrics = Arc::new(FakeMetrics {
        fail: metrics_fails,
        ..FakeMetrics::default()
    });
    let report = Arc::new(report);
    let (signals, rx) = mpsc::channel(4);

    let supervisor = Supervisor::new(
        config,
        Box::new(forwarder),
        metrics.clone(),
        report.clone(),
    )
    .with_signal_source(SignalSource::Mirror(rx));
    let state = supervisor.state_receiver();

    Harness {
        forwarder_started,
        metrics,
        report,
        signals,
        state,
        supervisor,
    }
}

async fn wait_for_state(state: &mut watch::Receiver<SupervisorState>, expected: SupervisorState) {
    timeout(Duration::from_secs(1), state.wait_for(|s| *s == expected))
        .await
        .expect("state not reached in time")
        .expect("supervisor dropped its state channel");
}

#[tokio::test(start_paused = true)]
async fn test_termination_signal_stops_everything() {
    let Harness {
        forwarder_started,
        metrics,
        report,
        signals,
        mut state,
        supervisor,
    } = harness(5, false, false);

    let run = tokio::spawn(supervisor.run());
    wait_for_state(&mut state, SupervisorState::Running).await;
    signals.send(Signal::Terminate).await.unwrap();

    let result = timeout(Duration::from_secs(1), run)
        .await
        .expect("supervisor should stop before the next report")
        .unwrap();
    assert!(result.is_ok());
    assert!(forwarder_started.load(Ordering::SeqCst));
    assert_eq!(metrics.stops.load(Ordering::SeqCst), 1);
    assert_eq!(report.reports.load(Ordering::SeqCst), 0);
    assert_eq!(*state.borrow(), SupervisorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_reports_until_signal() {
    let Harness {
        metrics,
        report,
        signals,
        mut state,
        supervisor,
        ..
    } = harness(5, false, false);

    let run = tokio::spawn(supervisor.run());
    wait_for_state(&mut state, SupervisorState::Running).await;
    sleep(Duration::from_secs(12)).await;
    assert_eq!(report.reports.load(Ordering::SeqCst), 2);

    signals.send(Signal::Quit).await.unwrap();
    run.await.unwrap().unwrap();

    assert_eq!(report.reports.load(Ordering::SeqCst), 2);
    assert_eq!(metrics.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_forwarder_failure_is_fatal() {
    let Harness {
        metrics,
        report,
        state,
        supervisor,
        ..
    } = harness(1, true, false);

    let result = supervisor.run().await;

    assert!(matches!(result, Err(SupervisorError::ForwarderStart(_))));
    assert_eq!(metrics.starts.load(Ordering::SeqCst), 0);
    assert_eq!(metrics.stops.load(Ordering::SeqCst), 0);
    sleep(Duration::from_millis(1200)).await;
    assert_eq!(report.reports.load(Ordering::SeqCst), 0);
    assert_eq!(*state.borrow(), SupervisorState::Starting);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_failure_is_tolerated() {
    let Harness {
        forwarder_started,
        metrics,
        report,
        signals,
        mut state,
        supervisor,
    } = harness(5, false, true);

    let run = tokio::spawn(supervisor.run());
    wait_for_state(&mut state, SupervisorState::Running).await;
    assert!(forwarder_started.load(Ordering::SeqCst));
    assert_eq!(metrics.starts.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(6)).await;
    assert_eq!(report.reports.load(Ordering::SeqCst), 1);
    assert!(!run.is_finished());

    signals.send(Signal::Interrupt).await.unwrap();
    run.await.unwrap().unwrap();
    // Stop is requested even when the runner never started
    assert_eq!(metrics.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_signals_trigger_one_shutdown() {
    let Harness {
        metrics,
        signals,
        mut state,
        supervisor,
        ..
    } = harness(5, false, false);

    let run = tokio::spawn(supervisor.run());
    wait_for_state(&mut state, SupervisorState::Running).await;
    signals.send(Signal::Terminate).await.unwrap();
    let _ = signals.send(Signal::Interrupt).await;
    let _ = signals.send(Signal::Terminate).await;

    run.await.unwrap().unwrap();
    assert_eq!(metrics.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_signal_before_running_still_shuts_down() {
    let Harness {
        metrics,
        signals,
        state,
        supervisor,
        ..
    } = harness(5, false, false);

    let mut watcher = state.clone();
    let collector = tokio::spawn(async move {
        let mut observed = vec![*watcher.borrow_and_update()];
        while watcher.changed().await.is_ok() {
            observed.push(*watcher.borrow_and_update());
        }
        observed
    });

    // Queued before the listener is armed, so it races the Running transition
    signals.send(Signal::Terminate).await.unwrap();
    let result = timeout(Duration::from_secs(2), supervisor.run())
        .await
        .expect("a queued signal should shut the supervisor down");
    assert!(result.is_ok());
    assert_eq!(metrics.stops.load(Ordering::SeqCst), 1);

    let observed = collector.await.unwrap();
    assert_eq!(observed.last(), Some(&SupervisorState::Stopped));
    if let Some(at) = observed
        .iter()
        .position(|s| *s == SupervisorState::ShuttingDown)
    {
        assert!(
            !observed[at..].contains(&SupervisorState::Running),
            "state went back to Running: {observed:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_report_keeps_agent_running() {
    let Harness {
        report,
        signals,
        mut state,
        supervisor,
        ..
    } = harness_with_report(
        5,
        false,
        false,
        FakeReport {
            panics: true,
            ..FakeReport::default()
        },
    );

    let run = tokio::spawn(supervisor.run());
    wait_for_state(&mut state, SupervisorState::Running).await;

    sleep(Duration::from_secs(12)).await;
    assert_eq!(report.reports.load(Ordering::SeqCst), 2);
    assert!(!run.is_finished(), "run must wait for a termination signal");
    assert_eq!(*state.borrow(), SupervisorState::Running);

    signals.send(Signal::Terminate).await.unwrap();
    run.await.unwrap().unwrap();
    assert_eq!(*state.borrow(), SupervisorState::Stopped);
}

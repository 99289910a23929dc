// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One-shot listener for process termination signals.
//!
//! The listener is armed once with a set of signal kinds and a callback. The
//! first delivered signal that belongs to the set runs the callback, after
//! which the listener stops observing signals altogether.

use std::fmt;
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

// Matches the buffer the supervisor historically used for its signal channel
const SIGNAL_BUFFER: usize = 4;

/// Termination signal kinds understood by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// SIGINT, or Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGQUIT
    Quit,
}

/// The signals that trigger an orderly shutdown of the agent.
pub const TERMINATION_SIGNALS: [Signal; 3] = [Signal::Interrupt, Signal::Terminate, Signal::Quit];

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Quit => write!(f, "SIGQUIT"),
        }
    }
}

#[cfg(unix)]
impl From<Signal> for tokio::signal::unix::SignalKind {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Interrupt => Self::interrupt(),
            Signal::Terminate => Self::terminate(),
            Signal::Quit => Self::quit(),
        }
    }
}

/// Where the listener receives signals from.
pub enum SignalSource {
    /// Signals delivered to this process by the operating system
    Os,
    /// Replays signals pushed into the channel, for testing
    Mirror(mpsc::Receiver<Signal>),
}

impl fmt::Debug for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Os => write!(f, "Os"),
            Self::Mirror(_) => write!(f, "Mirror"),
        }
    }
}

/// Handle to an armed signal listener.
#[derive(Debug)]
pub struct SignalListener {
    task: JoinHandle<()>,
}

impl SignalListener {
    /// Registers for `kinds` and arms the listener with `callback`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(source: SignalSource, kinds: &[Signal], callback: F) -> io::Result<Self>
    where
        F: FnOnce(Signal) + Send + 'static,
    {
        Ok(Self::register(source, kinds)?.on_first(callback))
    }

    /// Registers for `kinds` without arming a callback yet.
    ///
    /// OS handlers are installed before this returns, so a signal delivered
    /// between registration and arming is buffered rather than lost. Signals
    /// outside `kinds` are not observed.
    pub fn register(source: SignalSource, kinds: &[Signal]) -> io::Result<RegisteredSignals> {
        let kinds = kinds.iter().fold(Vec::new(), |mut unique, kind| {
            if !unique.contains(kind) {
                unique.push(*kind);
            }
            unique
        });

        let (rx, forwarders) = match source {
            SignalSource::Os => register_os_signals(&kinds)?,
            SignalSource::Mirror(rx) => (rx, Vec::new()),
        };

        Ok(RegisteredSignals {
            rx,
            kinds,
            forwarders,
        })
    }

    /// Whether the listener has stopped observing signals.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Signal registrations waiting for a callback.
#[derive(Debug)]
pub struct RegisteredSignals {
    rx: mpsc::Receiver<Signal>,
    kinds: Vec<Signal>,
    forwarders: Vec<JoinHandle<()>>,
}

impl RegisteredSignals {
    /// Spawns the listener; `callback` runs on the first matching signal.
    pub fn on_first<F>(self, callback: F) -> SignalListener
    where
        F: FnOnce(Signal) + Send + 'static,
    {
        let task = tokio::spawn(listen(self.rx, self.kinds, self.forwarders, callback));
        SignalListener { task }
    }
}

async fn listen<F>(
    mut rx: mpsc::Receiver<Signal>,
    kinds: Vec<Signal>,
    forwarders: Vec<JoinHandle<()>>,
    callback: F,
) where
    F: FnOnce(Signal),
{
    let mut received = None;
    while let Some(signal) = rx.recv().await {
        if kinds.contains(&signal) {
            received = Some(signal);
            break;
        }
        trace!("SIGNALS | Ignoring {signal}, not registered");
    }

    // Stop observing before running the callback: later signals have no effect
    for forwarder in forwarders {
        forwarder.abort();
    }
    drop(rx);

    match received {
        Some(signal) => {
            info!("SIGNALS | Received {signal}");
            callback(signal);
        }
        None => debug!("SIGNALS | Signal source closed before any signal arrived"),
    }
}

#[cfg(unix)]
fn register_os_signals(
    kinds: &[Signal],
) -> io::Result<(mpsc::Receiver<Signal>, Vec<JoinHandle<()>>)> {
    use tokio::signal::unix::signal;

    let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
    let mut streams = Vec::with_capacity(kinds.len());
    for kind in kinds {
        streams.push((*kind, signal((*kind).into())?));
    }

    let forwarders = streams
        .into_iter()
        .map(|(kind, mut stream)| {
            let tx = tx.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.try_send(kind).is_err() {
                        // Buffer full or listener gone, nothing left to notify
                        break;
                    }
                }
            })
        })
        .collect();

    Ok((rx, forwarders))
}

#[cfg(not(unix))]
fn register_os_signals(
    kinds: &[Signal],
) -> io::Result<(mpsc::Receiver<Signal>, Vec<JoinHandle<()>>)> {
    let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
    let mut forwarders = Vec::new();
    for kind in kinds {
        match kind {
            Signal::Interrupt => {
                let tx = tx.clone();
                forwarders.push(tokio::spawn(async move {
                    while tokio::signal::ctrl_c().await.is_ok() {
                        if tx.try_send(Signal::Interrupt).is_err() {
                            break;
                        }
                    }
                }));
            }
            other => debug!("SIGNALS | {other} is not supported on this platform"),
        }
    }
    Ok((rx, forwarders))
}

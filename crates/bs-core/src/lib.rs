// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-level supervisor for the bs node agent.
//!
//! The agent hosts a log forwarder, a metrics runner and a periodic status
//! reporter in a single process. [`Supervisor`] starts them in a fixed order,
//! arms a one-shot listener for termination signals and returns only after
//! the status reporter has acknowledged the shutdown.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod error;
pub mod logger;
pub mod reporter;
pub mod services;
pub mod signals;
pub mod status;
pub mod supervisor;

pub use config::Config;
pub use error::{ServiceError, SupervisorError};
pub use services::{LogForwarder, MetricsRunner, StatusReport};
pub use signals::{Signal, SignalListener, SignalSource, TERMINATION_SIGNALS};
pub use status::{ReporterAbort, ReporterCompletion, StatusReporter};
pub use supervisor::{Supervisor, SupervisorState};

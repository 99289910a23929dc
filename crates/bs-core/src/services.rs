// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Contracts the supervisor needs from the services it hosts.

use crate::error::ServiceError;
use async_trait::async_trait;

/// Long-lived log forwarding service.
///
/// Once started it keeps running in the background for the rest of the
/// process; there is no stop operation.
#[async_trait]
pub trait LogForwarder: Send {
    async fn start(&mut self) -> Result<(), ServiceError>;
}

/// Long-lived metrics collection service.
#[async_trait]
pub trait MetricsRunner: Send + Sync {
    async fn start(&self) -> Result<(), ServiceError>;

    /// Requests the runner to stop. Must return promptly, must be idempotent
    /// and must be harmless when `start` failed or never ran.
    fn stop(&self);
}

/// Side effect run by the status reporter on every interval.
///
/// Failures are the implementation's concern; nothing is returned.
#[async_trait]
pub trait StatusReport: Send + Sync {
    async fn report(&self);
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors a background service can report when it fails to start
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end the supervisor before a normal shutdown
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Unable to initialize log forwarder: {0}")]
    ForwarderStart(#[source] ServiceError),

    #[error("Unable to install signal handler: {0}")]
    SignalHandler(#[source] std::io::Error),
}

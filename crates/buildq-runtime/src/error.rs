// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for buildq-runtime.

use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The queue engine rejected an operation.
    #[error("Core error: {0}")]
    Core(#[from] buildq_core::Error),

    /// Executor failed.
    #[error("Executor error: {0}")]
    Executor(#[from] crate::executor::ExecutorError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The runtime has been shut down.
    #[error("Runtime is shut down")]
    ShutDown,
}

impl Error {
    /// Stable error code for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Core(err) => err.error_code(),
            Self::Executor(_) => "EXECUTOR_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::ShutDown => "SHUT_DOWN",
        }
    }
}

/// Result type using runtime Error.
pub type Result<T> = std::result::Result<T, Error>;

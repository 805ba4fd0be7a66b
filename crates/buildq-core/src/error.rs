// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for buildq-core.
//!
//! Queue operations themselves never fail: activation rejection and
//! assimilation misses are normal outcomes. The errors here cover request
//! preparation, project graph loading and configuration.

use thiserror::Error;

use crate::request::{MetaBuildId, Owner, RequestId};

/// Result type using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request was already stamped with a meta-build id by a handler.
    #[error("Build request {request_id} has already been handled (meta-build {meta_build_id})")]
    AlreadyHandled {
        /// The request that was passed in again.
        request_id: RequestId,
        /// The meta-build id it already carries.
        meta_build_id: MetaBuildId,
    },

    /// The request targets a project that is not part of the project graph.
    #[error("Unknown project '{0}'")]
    UnknownProject(Owner),

    /// The dependency graph contains a cycle along the given path.
    #[error("Dependency cycle detected: {}", format_path(.path))]
    DependencyCycle {
        /// Projects along the cycle, starting and ending with the same project.
        path: Vec<Owner>,
    },

    /// A project configuration is invalid.
    #[error("Invalid project '{project}': {reason}")]
    InvalidProject {
        /// The offending project.
        project: Owner,
        /// Why it was rejected.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable error code for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyHandled { .. } => "REQUEST_ALREADY_HANDLED",
            Self::UnknownProject(_) => "UNKNOWN_PROJECT",
            Self::DependencyCycle { .. } => "DEPENDENCY_CYCLE",
            Self::InvalidProject { .. } => "INVALID_PROJECT",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }
}

fn format_path(path: &[Owner]) -> String {
    path.iter()
        .map(Owner::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

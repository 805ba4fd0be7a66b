// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor trait definitions.
//!
//! Defines the control interface between the runtime and whatever actually
//! performs a build.

use async_trait::async_trait;
use buildq_core::revision::RevisionError;
use buildq_core::{BuildRequest, Owner, RequestId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use thiserror::Error;

/// Errors from executor operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// Execution was cancelled through its token.
    #[error("Execution cancelled")]
    Cancelled,

    /// The request's revision could not be fixed.
    #[error("Revision error: {0}")]
    Revision(#[from] RevisionError),

    /// The build could not be carried out.
    #[error("Build failed: {0}")]
    Failed(String),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// One build handed from the queue to an executor.
#[derive(Debug, Clone)]
pub struct BuildJob {
    /// The activated request.
    pub request: BuildRequest,
    /// Per-project build number assigned when the controller started.
    pub build_number: u64,
    /// Identifier the queue correlates `commencing` with.
    pub build_result_id: u64,
}

impl BuildJob {
    /// Id of the request being built.
    pub fn request_id(&self) -> RequestId {
        self.request.id()
    }

    /// Project being built.
    pub fn owner(&self) -> &Owner {
        self.request.owner()
    }
}

/// Result of a finished build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Whether the build succeeded.
    pub succeeded: bool,
    /// Failure message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
}

/// Cancellation token for stopping execution.
pub type CancelToken = Arc<AtomicBool>;

/// Trait for build executors.
///
/// Executors only run builds. Queue bookkeeping (commencing, completion,
/// events) is done by the caller.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Executor type identifier (e.g., "mock", "agent")
    fn executor_type(&self) -> &'static str;

    /// Whether this executor can build `owner` right now.
    ///
    /// Called from a controller's `start` while the queue lock is held, so it
    /// must not block. Returning false rejects the request.
    fn accepts(&self, owner: &Owner) -> bool;

    /// Run the build, waiting for completion or cancellation.
    async fn execute(&self, job: &BuildJob, cancel_token: CancelToken) -> Result<BuildOutcome>;
}

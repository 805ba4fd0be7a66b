// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock executor for testing.
//!
//! Simulates builds with a configurable delay instead of running anything.

use async_trait::async_trait;
use buildq_core::Owner;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::traits::*;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Mock executor for testing.
pub struct MockExecutor {
    executed: Mutex<Vec<BuildJob>>,
    refused: Mutex<HashSet<Owner>>,
    failing: Mutex<HashSet<Owner>>,
    /// Optional delay to simulate build time (in milliseconds)
    pub execution_delay_ms: u64,
    /// If true, builds fail by default
    pub fail_by_default: bool,
    /// If true, builds keep running until cancelled.
    pub never_complete: bool,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    /// Create a new mock executor.
    pub fn new() -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            refused: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            execution_delay_ms: 10,
            fail_by_default: false,
            never_complete: false,
        }
    }

    /// Create a mock executor whose builds run for `delay_ms`.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            execution_delay_ms: delay_ms,
            ..Self::new()
        }
    }

    /// Create a mock executor that fails by default.
    pub fn failing() -> Self {
        Self {
            fail_by_default: true,
            ..Self::new()
        }
    }

    /// Create a mock executor whose builds only end when cancelled.
    pub fn never_completing() -> Self {
        Self {
            execution_delay_ms: 0,
            never_complete: true,
            ..Self::new()
        }
    }

    /// Refuse to build `owner`; its controllers will reject.
    pub fn refuse_owner(&self, owner: Owner) {
        self.refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner);
    }

    /// Fail every build of `owner`.
    pub fn fail_owner(&self, owner: Owner) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner);
    }

    /// Jobs that reached `execute`, in call order.
    pub fn executed_jobs(&self) -> Vec<BuildJob> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Owners of executed jobs, in call order.
    pub fn executed_owners(&self) -> Vec<Owner> {
        self.executed_jobs()
            .iter()
            .map(|job| job.owner().clone())
            .collect()
    }

    fn should_fail(&self, owner: &Owner) -> bool {
        self.fail_by_default
            || self
                .failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(owner)
    }
}

#[async_trait]
impl BuildExecutor for MockExecutor {
    fn executor_type(&self) -> &'static str {
        "mock"
    }

    fn accepts(&self, owner: &Owner) -> bool {
        !self
            .refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(owner)
    }

    async fn execute(&self, job: &BuildJob, cancel_token: CancelToken) -> Result<BuildOutcome> {
        let start = Instant::now();
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job.clone());

        if self.never_complete {
            while !cancel_token.load(Ordering::SeqCst) {
                tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
            }
            return Err(ExecutorError::Cancelled);
        }

        // Simulate execution
        if self.execution_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.execution_delay_ms)).await;
        }

        if cancel_token.load(Ordering::SeqCst) {
            return Err(ExecutorError::Cancelled);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        if self.should_fail(job.owner()) {
            Ok(BuildOutcome {
                succeeded: false,
                message: Some("Mock failure".to_string()),
                duration_ms,
            })
        } else {
            Ok(BuildOutcome {
                succeeded: true,
                message: None,
                duration_ms,
            })
        }
    }
}

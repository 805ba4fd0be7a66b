// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Controllers that hand activated requests to the dispatcher.
//!
//! `start` runs under the queue lock, so it only allocates numbers and
//! pushes a [`BuildJob`] onto an unbounded channel. The dispatcher picks the
//! job up and drives the executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use buildq_core::{BuildController, BuildControllerFactory, BuildRequest, Owner};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::executor::{BuildExecutor, BuildJob};

struct Dispatch {
    executor: Arc<dyn BuildExecutor>,
    jobs: mpsc::UnboundedSender<BuildJob>,
    build_numbers: Mutex<HashMap<Owner, u64>>,
    next_build_result_id: AtomicU64,
}

impl Dispatch {
    fn next_build_number(&self, owner: &Owner) -> u64 {
        let mut numbers = self
            .build_numbers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let number = numbers.entry(owner.clone()).or_insert(0);
        *number += 1;
        *number
    }
}

/// Creates controllers that dispatch builds to an executor.
pub struct DispatchingControllerFactory {
    dispatch: Arc<Dispatch>,
}

impl DispatchingControllerFactory {
    /// Create a factory sending started builds to `jobs`.
    pub fn new(executor: Arc<dyn BuildExecutor>, jobs: mpsc::UnboundedSender<BuildJob>) -> Self {
        Self {
            dispatch: Arc::new(Dispatch {
                executor,
                jobs,
                build_numbers: Mutex::new(HashMap::new()),
                next_build_result_id: AtomicU64::new(1),
            }),
        }
    }
}

impl BuildControllerFactory for DispatchingControllerFactory {
    fn create(&self, request: &BuildRequest) -> Arc<dyn BuildController> {
        Arc::new(DispatchingController {
            request: request.clone(),
            dispatch: self.dispatch.clone(),
            build_result_id: AtomicU64::new(0),
        })
    }
}

/// Controller for one activated request.
pub struct DispatchingController {
    request: BuildRequest,
    dispatch: Arc<Dispatch>,
    build_result_id: AtomicU64,
}

impl BuildController for DispatchingController {
    fn start(&self) -> Option<u64> {
        let owner = self.request.owner();
        if !self.dispatch.executor.accepts(owner) {
            debug!(
                request_id = %self.request.id(),
                owner = %owner,
                executor = self.dispatch.executor.executor_type(),
                "Executor refused build"
            );
            return None;
        }

        let build_number = self.dispatch.next_build_number(owner);
        let build_result_id = self
            .dispatch
            .next_build_result_id
            .fetch_add(1, Ordering::SeqCst);

        let job = BuildJob {
            request: self.request.clone(),
            build_number,
            build_result_id,
        };
        if self.dispatch.jobs.send(job).is_err() {
            warn!(
                request_id = %self.request.id(),
                owner = %owner,
                "Dispatcher is gone, rejecting build"
            );
            return None;
        }

        self.build_result_id.store(build_result_id, Ordering::SeqCst);
        Some(build_number)
    }

    fn build_result_id(&self) -> u64 {
        self.build_result_id.load(Ordering::SeqCst)
    }
}

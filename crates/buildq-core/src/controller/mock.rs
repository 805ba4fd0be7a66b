// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock controllers for testing.
//!
//! Simulates starting builds without running anything: build numbers are
//! handed out per owner, result ids globally, and every start is recorded.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::traits::*;
use crate::request::{BuildRequest, Owner, RequestId};

/// A start attempt recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRecord {
    /// The request that was started.
    pub request_id: RequestId,
    /// Its owner.
    pub owner: Owner,
    /// Assigned build number, `None` if rejected.
    pub build_number: Option<u64>,
    /// Assigned build result id, zero if rejected.
    pub build_result_id: u64,
}

#[derive(Debug, Default)]
struct MockState {
    build_numbers: HashMap<Owner, u64>,
    next_result_id: u64,
    rejected_owners: HashSet<Owner>,
    reject_all: bool,
    starts: Vec<StartRecord>,
}

/// Mock controller factory for testing.
#[derive(Debug, Clone, Default)]
pub struct MockControllerFactory {
    state: Arc<Mutex<MockState>>,
}

impl MockControllerFactory {
    /// Create a factory whose controllers always start.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory whose controllers always reject.
    pub fn rejecting() -> Self {
        let factory = Self::new();
        factory.lock().reject_all = true;
        factory
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject every future start for `owner`.
    pub fn reject_owner(&self, owner: Owner) {
        self.lock().rejected_owners.insert(owner);
    }

    /// Accept future starts for `owner` again.
    pub fn accept_owner(&self, owner: &Owner) {
        self.lock().rejected_owners.remove(owner);
    }

    /// Every start attempt so far, in call order.
    pub fn starts(&self) -> Vec<StartRecord> {
        self.lock().starts.clone()
    }

    /// Ids of requests that were started successfully, in call order.
    pub fn started_requests(&self) -> Vec<RequestId> {
        self.lock()
            .starts
            .iter()
            .filter(|record| record.build_number.is_some())
            .map(|record| record.request_id)
            .collect()
    }

    /// The build result id assigned to `request_id`, if it was started.
    pub fn build_result_id_for(&self, request_id: RequestId) -> Option<u64> {
        self.lock()
            .starts
            .iter()
            .find(|record| record.request_id == request_id && record.build_number.is_some())
            .map(|record| record.build_result_id)
    }
}

impl BuildControllerFactory for MockControllerFactory {
    fn create(&self, request: &BuildRequest) -> Arc<dyn BuildController> {
        Arc::new(MockController {
            state: self.state.clone(),
            request_id: request.id(),
            owner: request.owner().clone(),
            build_result_id: AtomicU64::new(0),
        })
    }
}

/// Controller produced by [`MockControllerFactory`].
#[derive(Debug)]
pub struct MockController {
    state: Arc<Mutex<MockState>>,
    request_id: RequestId,
    owner: Owner,
    build_result_id: AtomicU64,
}

impl BuildController for MockController {
    fn start(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let rejected = state.reject_all || state.rejected_owners.contains(&self.owner);
        let (build_number, result_id) = if rejected {
            (None, 0)
        } else {
            let number = state.build_numbers.entry(self.owner.clone()).or_insert(0);
            *number += 1;
            let number = *number;
            state.next_result_id += 1;
            (Some(number), state.next_result_id)
        };

        self.build_result_id.store(result_id, Ordering::SeqCst);
        state.starts.push(StartRecord {
            request_id: self.request_id,
            owner: self.owner.clone(),
            build_number,
            build_result_id: result_id,
        });
        build_number
    }

    fn build_result_id(&self) -> u64 {
        self.build_result_id.load(Ordering::SeqCst)
    }
}

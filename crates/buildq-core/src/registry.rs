// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request lifecycle registry.
//!
//! The queue reports every lifecycle transition to a [`BuildRequestRegistry`].
//! Implementations must not panic: the queue calls them while holding its
//! lock and their failures must not corrupt queue state.
//!
//! [`InMemoryRequestRegistry`] keeps a bounded history of request records and
//! lets async callers wait for a request to be handled.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::config::DEFAULT_REGISTRY_CAPACITY;
use crate::request::{BuildRequest, MetaBuildId, Owner, RequestId};

/// Sink for request lifecycle notifications.
pub trait BuildRequestRegistry: Send + Sync {
    /// A request was created or cloned by the handler. Idempotent.
    fn register(&self, request: &BuildRequest);

    /// The request was inserted into the queue.
    fn request_queued(&self, request: &BuildRequest);

    /// The queued request was cancelled.
    fn request_cancelled(&self, request: &BuildRequest);

    /// The request's controller started build `build_number`.
    fn request_activated(&self, request: &BuildRequest, build_number: u64);

    /// The request was dropped, `reason` is a message key.
    fn request_rejected(&self, request: &BuildRequest, reason: &str);

    /// `source` was merged into the pending request `target`.
    fn request_assimilated(&self, source: &BuildRequest, target: RequestId);
}

/// Lifecycle status of a recorded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Registered but not yet seen by the queue.
    Unhandled,
    /// Waiting in the queue.
    Queued,
    /// Handed to a controller.
    Activated,
    /// Dropped without a build.
    Rejected,
    /// Merged into another request.
    Assimilated,
    /// Cancelled while queued.
    Cancelled,
}

impl RequestStatus {
    /// Whether the request has left the queue's hands for good, from the
    /// registry's point of view.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Unhandled | Self::Queued)
    }
}

/// What the registry knows about one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    /// The request id.
    pub id: RequestId,
    /// The request owner.
    pub owner: Owner,
    /// The meta-build the request belongs to.
    pub meta_build_id: Option<MetaBuildId>,
    /// Current status.
    pub status: RequestStatus,
    /// Build number, once activated.
    pub build_number: Option<u64>,
    /// The request this one was assimilated into.
    pub assimilated_into: Option<RequestId>,
    /// Message key explaining a rejection.
    pub rejection_reason: Option<String>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl RequestRecord {
    fn new(request: &BuildRequest) -> Self {
        Self {
            id: request.id(),
            owner: request.owner().clone(),
            meta_build_id: request.meta_build_id(),
            status: RequestStatus::Unhandled,
            build_number: None,
            assimilated_into: None,
            rejection_reason: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    records: HashMap<RequestId, RequestRecord>,
    order: VecDeque<RequestId>,
}

/// Bounded in-memory registry.
pub struct InMemoryRequestRegistry {
    capacity: usize,
    state: Mutex<RegistryState>,
    changes: watch::Sender<u64>,
}

impl Default for InMemoryRequestRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl InMemoryRequestRegistry {
    /// Create a registry keeping at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(RegistryState::default()),
            changes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status of a request, if recorded.
    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.lock().records.get(&id).map(|record| record.status)
    }

    /// The full record of a request, if recorded.
    pub fn record(&self, id: RequestId) -> Option<RequestRecord> {
        self.lock().records.get(&id).cloned()
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<RequestRecord> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect()
    }

    /// Number of records per status.
    pub fn summary(&self) -> HashMap<RequestStatus, usize> {
        let mut summary = HashMap::new();
        for record in self.lock().records.values() {
            *summary.entry(record.status).or_insert(0) += 1;
        }
        summary
    }

    /// Wait until the request leaves [`RequestStatus::Unhandled`].
    ///
    /// Returns the status reached, or `None` on timeout.
    pub async fn wait_for_handled(&self, id: RequestId, timeout: Duration) -> Option<RequestStatus> {
        self.wait_for(id, timeout, |status| status != RequestStatus::Unhandled)
            .await
    }

    /// Wait until the request reaches a settled status.
    ///
    /// Returns the status reached, or `None` on timeout.
    pub async fn wait_for_activated(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> Option<RequestStatus> {
        self.wait_for(id, timeout, |status| status.is_settled()).await
    }

    async fn wait_for(
        &self,
        id: RequestId,
        timeout: Duration,
        done: impl Fn(RequestStatus) -> bool,
    ) -> Option<RequestStatus> {
        let mut rx = self.changes.subscribe();
        let wait = async {
            loop {
                if let Some(status) = self.status(id).filter(|status| done(*status)) {
                    return Some(status);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    fn update(&self, request: &BuildRequest, apply: impl FnOnce(&mut RequestRecord)) {
        {
            let mut state = self.lock();
            if !state.records.contains_key(&request.id()) {
                Self::insert(&mut state, self.capacity, RequestRecord::new(request));
            }
            if let Some(record) = state.records.get_mut(&request.id()) {
                // Clones are registered before the handler stamps the meta-build.
                if record.meta_build_id.is_none() {
                    record.meta_build_id = request.meta_build_id();
                }
                apply(record);
                record.updated_at = Utc::now();
                debug!(
                    request_id = %record.id,
                    owner = %record.owner,
                    status = ?record.status,
                    "Request status updated"
                );
            }
        }
        self.changes.send_modify(|counter| *counter = counter.wrapping_add(1));
    }

    fn insert(state: &mut RegistryState, capacity: usize, record: RequestRecord) {
        while state.records.len() >= capacity {
            let settled = state.order.iter().position(|id| {
                state
                    .records
                    .get(id)
                    .is_none_or(|record| record.status.is_settled())
            });
            let Some(evicted) = state.order.remove(settled.unwrap_or(0)) else {
                break;
            };
            state.records.remove(&evicted);
        }
        state.order.push_back(record.id);
        state.records.insert(record.id, record);
    }
}

impl BuildRequestRegistry for InMemoryRequestRegistry {
    fn register(&self, request: &BuildRequest) {
        self.update(request, |_| {});
    }

    fn request_queued(&self, request: &BuildRequest) {
        self.update(request, |record| record.status = RequestStatus::Queued);
    }

    fn request_cancelled(&self, request: &BuildRequest) {
        self.update(request, |record| record.status = RequestStatus::Cancelled);
    }

    fn request_activated(&self, request: &BuildRequest, build_number: u64) {
        self.update(request, |record| {
            record.status = RequestStatus::Activated;
            record.build_number = Some(build_number);
        });
    }

    fn request_rejected(&self, request: &BuildRequest, reason: &str) {
        self.update(request, |record| {
            record.status = RequestStatus::Rejected;
            record.rejection_reason = Some(reason.to_string());
        });
    }

    fn request_assimilated(&self, source: &BuildRequest, target: RequestId) {
        self.update(source, |record| {
            record.status = RequestStatus::Assimilated;
            record.assimilated_into = Some(target);
        });
    }
}

/// Registry that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRequestRegistry;

impl BuildRequestRegistry for NoopRequestRegistry {
    fn register(&self, _request: &BuildRequest) {}
    fn request_queued(&self, _request: &BuildRequest) {}
    fn request_cancelled(&self, _request: &BuildRequest) {}
    fn request_activated(&self, _request: &BuildRequest, _build_number: u64) {}
    fn request_rejected(&self, _request: &BuildRequest, _reason: &str) {}
    fn request_assimilated(&self, _source: &BuildRequest, _target: RequestId) {}
}

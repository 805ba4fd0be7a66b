// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for buildq-core integration tests.
//!
//! Provides TestQueue wiring a queue to a mock controller factory and an
//! in-memory registry, plus request builders.

#![allow(dead_code)]

use std::sync::Arc;

use buildq_core::controller::MockControllerFactory;
use buildq_core::events::BroadcastPublisher;
use buildq_core::predicate::QueuePredicate;
use buildq_core::registry::InMemoryRequestRegistry;
use buildq_core::{
    BuildQueue, BuildReason, BuildRequest, BuildRevision, Owner, QueuedRequest, RequestHolder,
    RequestId, Revision, TriggerOptions,
};

/// Queue plus the collaborators it talks to.
pub struct TestQueue {
    pub queue: BuildQueue,
    pub controllers: MockControllerFactory,
    pub registry: Arc<InMemoryRequestRegistry>,
    pub events: Arc<BroadcastPublisher>,
}

impl TestQueue {
    pub fn new() -> Self {
        Self::with_controllers(MockControllerFactory::new())
    }

    pub fn with_controllers(controllers: MockControllerFactory) -> Self {
        let registry = Arc::new(InMemoryRequestRegistry::new(1000));
        let events = Arc::new(BroadcastPublisher::new(64));
        let queue = BuildQueue::new(Arc::new(controllers.clone()), registry.clone())
            .with_events(events.clone());
        Self {
            queue,
            controllers,
            registry,
            events,
        }
    }

    /// Ids of activated requests, oldest activation first.
    pub fn activated_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = self
            .queue
            .activated_requests()
            .iter()
            .map(|activated| activated.id())
            .collect();
        ids.reverse();
        ids
    }

    /// Ids of queued requests, oldest first.
    pub fn queued_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = self
            .queue
            .queued_requests()
            .iter()
            .map(|queued| queued.id())
            .collect();
        ids.reverse();
        ids
    }

    /// Build result id the mock controller assigned to `request_id`.
    pub fn result_id(&self, request_id: RequestId) -> u64 {
        self.controllers
            .build_result_id_for(request_id)
            .expect("request was never started")
    }
}

pub fn scm_options(source: &str) -> TriggerOptions {
    TriggerOptions::new(
        BuildReason::Trigger {
            name: source.to_string(),
        },
        source,
    )
}

pub fn request(owner: &str, revision: &str, options: TriggerOptions) -> BuildRequest {
    BuildRequest::new(
        Owner::new(owner),
        BuildRevision::fixed(Revision::new(revision)),
        options,
    )
}

/// A request with the default predicates of a project limited to `limit`
/// concurrent builds.
pub fn queued(owner: &str, limit: i32) -> QueuedRequest {
    queued_with(request(owner, "1", scm_options("scm")), limit)
}

/// A replaceable request from `source` at `revision`.
pub fn replaceable(owner: &str, source: &str, revision: &str) -> QueuedRequest {
    queued_with(
        request(owner, revision, scm_options(source).replaceable(true)),
        1,
    )
}

pub fn queued_with(request: BuildRequest, limit: i32) -> QueuedRequest {
    let ordering = if request.can_jump_queue() {
        QueuePredicate::HeadOfOwnerCanJump
    } else {
        QueuePredicate::HeadOfOwnerQueue
    };
    QueuedRequest::new(
        request,
        vec![QueuePredicate::ActiveBuildsPerOwner { limit }, ordering],
    )
}

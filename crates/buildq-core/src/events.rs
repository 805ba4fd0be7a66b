// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue lifecycle events.
//!
//! Publication is deferred: the queue never waits for subscribers, so a slow
//! subscriber can only lag behind (and miss events), never stall activation.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::request::{MetaBuildId, Owner, RequestId};

/// An event announced by the queue or the runtime driving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A request was activated and its controller started a build.
    BuildActivated {
        /// The activated request.
        request_id: RequestId,
        /// Its owner.
        owner: Owner,
        /// Its meta-build.
        meta_build_id: Option<MetaBuildId>,
        /// The build number assigned by the controller.
        build_number: u64,
    },
    /// The build of an activated request finished and left the queue.
    BuildCompleted {
        /// The completed request.
        request_id: RequestId,
        /// Its owner.
        owner: Owner,
        /// The build number.
        build_number: u64,
        /// Whether the build succeeded.
        succeeded: bool,
    },
}

impl QueueEvent {
    /// The request the event is about.
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::BuildActivated { request_id, .. } | Self::BuildCompleted { request_id, .. } => {
                *request_id
            }
        }
    }
}

/// Sink for queue events.
pub trait EventPublisher: Send + Sync {
    /// Publish an event without waiting for subscribers.
    fn publish(&self, event: QueueEvent);
}

/// Publisher that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: QueueEvent) {}
}

/// Publisher fanning events out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<QueueEvent>,
}

impl BroadcastPublisher {
    /// Create a publisher buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: QueueEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(request_id = %e.0.request_id(), "No event subscribers");
        }
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the in-memory registry as seen through the queue.

mod common;

use std::sync::Arc;
use std::time::Duration;

use buildq_core::registry::RequestStatus;
use buildq_core::{BuildRequestRegistry, RequestHolder};
use common::*;

#[tokio::test]
async fn test_wait_for_activated_through_queue() {
    let ctx = Arc::new(TestQueue::new());
    ctx.queue.enqueue(vec![queued("p", 1)]);
    let waiting = queued("p", 1);
    let first = ctx.activated_ids()[0];
    let id = waiting.id();
    ctx.queue.enqueue(vec![waiting]);

    assert_eq!(
        ctx.registry
            .wait_for_handled(id, Duration::from_millis(50))
            .await,
        Some(RequestStatus::Queued)
    );
    assert_eq!(
        ctx.registry
            .wait_for_activated(id, Duration::from_millis(20))
            .await,
        None
    );

    let completer = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ctx.queue.complete(first)
        })
    };

    assert_eq!(
        ctx.registry
            .wait_for_activated(id, Duration::from_secs(5))
            .await,
        Some(RequestStatus::Activated)
    );
    assert!(completer.await.unwrap());
    assert_eq!(ctx.registry.record(id).unwrap().build_number, Some(2));
}

#[test]
fn test_registered_clone_keeps_unhandled_until_queued() {
    let ctx = TestQueue::new();
    let request = queued("p", 1);
    ctx.registry.register(request.request());
    assert_eq!(
        ctx.registry.status(request.id()),
        Some(RequestStatus::Unhandled)
    );

    let id = request.id();
    ctx.queue.enqueue(vec![request]);
    assert_eq!(ctx.registry.status(id), Some(RequestStatus::Activated));
    assert_eq!(ctx.registry.records().len(), 1);
}

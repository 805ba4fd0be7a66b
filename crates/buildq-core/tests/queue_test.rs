// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the build queue state machine.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use buildq_core::controller::{MockControllerFactory, REJECTED_WITH_FAILURE};
use buildq_core::predicate::QueuePredicate;
use buildq_core::registry::RequestStatus;
use buildq_core::{EnqueueOutcome, MetaBuildId, Owner, QueueEvent, RequestHolder, Revision};
use common::*;

#[test]
fn test_example_single_project_scenario() {
    let ctx = TestQueue::new();
    let r1 = queued("p", 1);
    let r2 = queued("p", 1);
    let (r1_id, r2_id) = (r1.id(), r2.id());

    ctx.queue.enqueue(vec![r1]);
    assert_eq!(ctx.activated_ids(), vec![r1_id]);
    assert_eq!(
        ctx.queue.activated_requests()[0].build_number(),
        Some(1)
    );

    ctx.queue.enqueue(vec![r2]);
    assert_eq!(ctx.queued_ids(), vec![r2_id]);
    assert_eq!(ctx.registry.status(r2_id), Some(RequestStatus::Queued));

    assert!(ctx.queue.complete(r1_id));
    assert_eq!(ctx.activated_ids(), vec![r2_id]);
    assert!(ctx.queue.queued_requests().is_empty());
    assert_eq!(
        ctx.registry.record(r2_id).unwrap().build_number,
        Some(2)
    );
}

#[test]
fn test_fifo_per_owner() {
    let ctx = TestQueue::new();
    let requests: Vec<_> = (0..4).map(|_| queued("p", 1)).collect();
    let ids: Vec<_> = requests.iter().map(|r| r.id()).collect();
    for request in requests {
        ctx.queue.enqueue(vec![request]);
    }

    for id in &ids {
        assert_eq!(ctx.activated_ids(), vec![*id]);
        assert!(ctx.queue.complete(*id));
    }
    assert_eq!(ctx.controllers.started_requests(), ids);
}

#[test]
fn test_fifo_within_one_batch() {
    let ctx = TestQueue::new();
    let batch: Vec<_> = (0..3).map(|_| queued("p", 0)).collect();
    let ids: Vec<_> = batch.iter().map(|r| r.id()).collect();

    assert_eq!(ctx.queue.enqueue(batch), EnqueueOutcome::Queued(ids.clone()));

    // Unlimited concurrency: the head-of-queue chain resolves in one pass.
    assert_eq!(ctx.controllers.started_requests(), ids);
}

#[test]
fn test_concurrency_limit() {
    let ctx = TestQueue::new();
    let owner = Owner::new("p");
    let ids: Vec<_> = (0..5)
        .map(|_| {
            let request = queued("p", 2);
            let id = request.id();
            ctx.queue.enqueue(vec![request]);
            assert!(ctx.queue.activated_requests_by_owner(&owner).len() <= 2);
            id
        })
        .collect();

    assert_eq!(ctx.activated_ids(), ids[..2].to_vec());
    assert_eq!(ctx.queue.queued_requests_by_owner(&owner).len(), 3);

    assert!(ctx.queue.complete(ids[1]));
    assert_eq!(ctx.activated_ids(), vec![ids[0], ids[2]]);
    assert!(ctx.queue.complete(ids[0]));
    assert!(ctx.queue.complete(ids[2]));
    assert_eq!(ctx.activated_ids(), vec![ids[3], ids[4]]);
}

#[test]
fn test_owners_do_not_block_each_other() {
    let ctx = TestQueue::new();
    let a = queued("a", 1);
    let b = queued("b", 1);
    let (a_id, b_id) = (a.id(), b.id());
    ctx.queue.enqueue(vec![a]);
    ctx.queue.enqueue(vec![queued("a", 1)]);
    ctx.queue.enqueue(vec![b]);

    assert_eq!(ctx.activated_ids(), vec![a_id, b_id]);
    assert!(ctx.queue.has_request(&Owner::new("a")));
    assert_eq!(ctx.queue.requests_by_owner(&Owner::new("a")).len(), 2);
    assert!(!ctx.queue.has_request(&Owner::new("c")));
}

#[test]
fn test_assimilation_into_queued_request() {
    let ctx = TestQueue::new();
    let blocker = queued_with(request("p", "0", scm_options("manual")), 1);
    ctx.queue.enqueue(vec![blocker]);

    let first = replaceable("p", "scm", "1");
    let second = replaceable("p", "scm", "2");
    let (first_id, second_id) = (first.id(), second.id());

    assert!(!ctx.queue.enqueue(vec![first]).is_assimilated());
    assert_eq!(
        ctx.queue.enqueue(vec![second]),
        EnqueueOutcome::Assimilated(vec![(second_id, first_id)])
    );

    let queued = ctx.queue.queued_requests();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id(), first_id);
    assert_eq!(
        queued[0].request().revision().revision(),
        Some(Revision::new("2"))
    );

    let record = ctx.registry.record(second_id).unwrap();
    assert_eq!(record.status, RequestStatus::Assimilated);
    assert_eq!(record.assimilated_into, Some(first_id));
}

#[test]
fn test_assimilation_into_activated_request_before_commence() {
    let ctx = TestQueue::new();
    let first = replaceable("p", "scm", "1");
    let first_id = first.id();
    ctx.queue.enqueue(vec![first]);
    assert_eq!(ctx.activated_ids(), vec![first_id]);

    let second = replaceable("p", "scm", "2");
    assert!(ctx.queue.enqueue(vec![second]).is_assimilated());

    let activated = ctx.queue.request(first_id).unwrap();
    assert_eq!(activated.revision().revision(), Some(Revision::new("2")));
    assert_eq!(ctx.controllers.started_requests(), vec![first_id]);
}

#[test]
fn test_assimilation_blocked_after_commence() {
    let ctx = TestQueue::new();
    let first = replaceable("p", "scm", "1");
    let first_id = first.id();
    ctx.queue.enqueue(vec![first]);
    ctx.queue.commencing(ctx.result_id(first_id));
    assert!(ctx.queue.activated_requests()[0].is_commenced());

    let second = replaceable("p", "scm", "2");
    let second_id = second.id();
    assert_eq!(
        ctx.queue.enqueue(vec![second]),
        EnqueueOutcome::Queued(vec![second_id])
    );
    assert_eq!(ctx.queued_ids(), vec![second_id]);
    assert_eq!(
        ctx.queue.request(first_id).unwrap().revision().revision(),
        Some(Revision::new("1"))
    );
}

#[test]
fn test_assimilation_requires_both_replaceable() {
    let ctx = TestQueue::new();
    let target = queued_with(request("p", "1", scm_options("scm")), 1);
    ctx.queue.enqueue(vec![target]);

    assert!(!ctx.queue.enqueue(vec![replaceable("p", "scm", "2")]).is_assimilated());

    let replaceable_target = replaceable("q", "scm", "1");
    ctx.queue.enqueue(vec![replaceable_target]);
    let source = queued_with(request("q", "2", scm_options("scm")), 1);
    assert!(!ctx.queue.enqueue(vec![source]).is_assimilated());
}

#[test]
fn test_assimilation_is_all_or_nothing() {
    let ctx = TestQueue::new();
    let target = replaceable("p", "scm", "1");
    let target_id = target.id();
    ctx.queue.enqueue(vec![target]);

    let matching = replaceable("p", "scm", "2");
    let unmatched = replaceable("q", "scm", "2");
    let ids = vec![matching.id(), unmatched.id()];

    assert_eq!(
        ctx.queue.enqueue(vec![matching, unmatched]),
        EnqueueOutcome::Queued(ids.clone())
    );
    assert_eq!(
        ctx.queue.request(target_id).unwrap().revision().revision(),
        Some(Revision::new("1"))
    );
    assert_eq!(ctx.registry.status(ids[0]), Some(RequestStatus::Queued));
}

#[test]
fn test_cancel_only_queued_requests() {
    let ctx = TestQueue::new();
    let active = queued("p", 1);
    let waiting = queued("p", 1);
    let (active_id, waiting_id) = (active.id(), waiting.id());
    ctx.queue.enqueue(vec![active]);
    ctx.queue.enqueue(vec![waiting]);

    assert!(!ctx.queue.cancel(active_id));
    assert_eq!(ctx.activated_ids(), vec![active_id]);

    assert!(ctx.queue.cancel(waiting_id));
    assert!(!ctx.queue.cancel(waiting_id));
    assert!(ctx.queue.queued_requests().is_empty());
    assert_eq!(ctx.registry.status(waiting_id), Some(RequestStatus::Cancelled));

    assert!(!ctx.queue.complete(waiting_id));
}

#[test]
fn test_cancel_unblocks_next_request() {
    let ctx = TestQueue::new();
    let meta = MetaBuildId::next();
    let mut upstream = request("lib", "1", scm_options("scm"));
    upstream.set_meta_build_id(meta);
    let mut downstream = request("app", "1", scm_options("scm"));
    downstream.set_meta_build_id(meta);

    // Keep the upstream queued behind another lib build.
    ctx.queue.enqueue(vec![queued("lib", 1)]);
    let upstream = queued_with(upstream, 1);
    let upstream_id = upstream.id();
    let mut downstream = queued_with(downstream, 1);
    downstream.add_predicate(QueuePredicate::DependencyComplete {
        owner: Owner::new("lib"),
    });
    let downstream_id = downstream.id();
    ctx.queue.enqueue(vec![upstream, downstream]);
    assert_eq!(ctx.queued_ids(), vec![upstream_id, downstream_id]);

    assert!(ctx.queue.cancel(upstream_id));
    assert_eq!(ctx.activated_ids().last(), Some(&downstream_id));
}

#[test]
fn test_dependency_ordering() {
    let ctx = TestQueue::new();
    let meta = MetaBuildId::next();
    let mut a = request("a", "1", scm_options("scm"));
    a.set_meta_build_id(meta);
    let mut b = request("b", "1", scm_options("scm"));
    b.set_meta_build_id(meta);

    let a = queued_with(a, 1);
    let mut b = queued_with(b, 1);
    b.add_predicate(QueuePredicate::DependencyComplete {
        owner: Owner::new("a"),
    });
    let (a_id, b_id) = (a.id(), b.id());

    ctx.queue.enqueue(vec![a, b]);
    assert_eq!(ctx.activated_ids(), vec![a_id]);
    assert_eq!(ctx.queued_ids(), vec![b_id]);
    assert_eq!(ctx.queue.meta_build_requests(meta).len(), 2);

    assert!(ctx.queue.complete(a_id));
    assert_eq!(ctx.activated_ids(), vec![b_id]);
    assert_eq!(ctx.controllers.started_requests(), vec![a_id, b_id]);
}

#[test]
fn test_jumping_request_skips_blocked_head() {
    let ctx = TestQueue::new();
    let meta = MetaBuildId::next();

    // The lib request stays queued behind another lib build, which keeps the
    // older app request waiting on it.
    ctx.queue.enqueue(vec![queued("lib", 1)]);
    let mut lib = request("lib", "1", scm_options("scm"));
    lib.set_meta_build_id(meta);
    let mut waiting = request("app", "1", scm_options("scm"));
    waiting.set_meta_build_id(meta);
    let mut waiting = queued_with(waiting, 2);
    waiting.add_predicate(QueuePredicate::DependencyComplete {
        owner: Owner::new("lib"),
    });
    let waiting_id = waiting.id();
    ctx.queue.enqueue(vec![queued_with(lib, 1), waiting]);

    let follower = queued("app", 2);
    let follower_id = follower.id();
    ctx.queue.enqueue(vec![follower]);
    assert!(ctx.queued_ids().contains(&follower_id));

    let jumper = queued_with(
        request("app", "1", scm_options("manual").jump_queue(true)),
        2,
    );
    let jumper_id = jumper.id();
    ctx.queue.enqueue(vec![jumper]);

    assert!(ctx.activated_ids().contains(&jumper_id));
    assert!(ctx.queued_ids().contains(&waiting_id));
    assert!(ctx.queued_ids().contains(&follower_id));
}

#[test]
fn test_rejected_request_is_dropped() {
    let controllers = MockControllerFactory::new();
    controllers.reject_owner(Owner::new("p"));
    let ctx = TestQueue::with_controllers(controllers);

    let rejected = queued("p", 1);
    let accepted = queued("q", 1);
    let (rejected_id, accepted_id) = (rejected.id(), accepted.id());
    ctx.queue.enqueue(vec![rejected, accepted]);

    assert_eq!(ctx.activated_ids(), vec![accepted_id]);
    assert!(ctx.queue.request(rejected_id).is_none());
    let record = ctx.registry.record(rejected_id).unwrap();
    assert_eq!(record.status, RequestStatus::Rejected);
    assert_eq!(record.rejection_reason.as_deref(), Some(REJECTED_WITH_FAILURE));
}

#[test]
fn test_pause_applies_cancellations_atomically() {
    let ctx = TestQueue::new();
    let meta = MetaBuildId::next();

    ctx.queue.enqueue(vec![queued("lib", 1)]);
    let blocker_id = ctx.activated_ids()[0];

    let mut lib = request("lib", "1", scm_options("scm"));
    lib.set_meta_build_id(meta);
    let lib = queued_with(lib, 1);
    let mut dependents = Vec::new();
    for owner in ["app", "web"] {
        let mut dependent = request(owner, "1", scm_options("scm"));
        dependent.set_meta_build_id(meta);
        let mut dependent = queued_with(dependent, 1);
        dependent.add_predicate(QueuePredicate::DependencyComplete {
            owner: Owner::new("lib"),
        });
        dependents.push(dependent);
    }
    let (lib_id, app_id, web_id) = (lib.id(), dependents[0].id(), dependents[1].id());
    let mut batch = vec![lib];
    batch.extend(dependents);
    ctx.queue.enqueue(batch);
    assert_eq!(ctx.queued_ids(), vec![lib_id, app_id, web_id]);

    let mut paused = ctx.queue.pause();
    assert!(paused.cancel(lib_id));
    // Without the pause this cancellation would already have started app.
    assert!(paused.cancel(app_id));
    assert_eq!(ctx.controllers.started_requests(), vec![blocker_id]);
    paused.resume();

    assert_eq!(ctx.controllers.started_requests(), vec![blocker_id, web_id]);
    assert_eq!(ctx.registry.status(app_id), Some(RequestStatus::Cancelled));
}

#[test]
fn test_pause_guard_resumes_on_drop() {
    let ctx = TestQueue::new();
    {
        let mut paused = ctx.queue.pause();
        paused.enqueue(vec![queued("p", 1)]);
        assert!(paused.has_request(&Owner::new("p")));
    }
    assert_eq!(ctx.queue.activated_request_count(), 1);

    // The queue can be paused again once the guard is gone.
    drop(ctx.queue.pause());
}

#[test]
fn test_stop_prevents_further_activation() {
    let ctx = TestQueue::new();
    let first = queued("p", 1);
    let first_id = first.id();
    ctx.queue.enqueue(vec![first]);
    ctx.queue.enqueue(vec![queued("p", 1)]);

    ctx.queue.stop();
    assert!(ctx.queue.complete(first_id));
    assert_eq!(ctx.queue.activated_request_count(), 0);
    assert_eq!(ctx.queue.queued_requests().len(), 1);
}

#[test]
fn test_activation_event_published() {
    let ctx = TestQueue::new();
    let mut rx = ctx.events.subscribe();
    let request = queued("p", 1);
    let id = request.id();
    ctx.queue.enqueue(vec![request]);

    match rx.try_recv().unwrap() {
        QueueEvent::BuildActivated {
            request_id,
            owner,
            build_number,
            ..
        } => {
            assert_eq!(request_id, id);
            assert_eq!(owner, Owner::new("p"));
            assert_eq!(build_number, 1);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_snapshot_is_a_predicate_view() {
    let ctx = TestQueue::new();
    ctx.queue.enqueue(vec![queued("p", 1)]);
    let waiting = queued("p", 1);
    ctx.queue.enqueue(vec![waiting.clone()]);

    let snapshot = ctx.queue.snapshot();
    assert_eq!(snapshot.activated.len(), 1);
    assert_eq!(snapshot.queued.len(), 1);
    assert!(!waiting.satisfied(&snapshot));
}

#[test]
fn test_concurrent_enqueue_and_complete() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 25;
    const LIMIT: usize = 2;

    let ctx = Arc::new(TestQueue::new());
    let mut expected: HashMap<Owner, Vec<_>> = HashMap::new();

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for thread in 0..THREADS {
            let ctx = ctx.clone();
            handles.push(scope.spawn(move || {
                let owner = format!("owner-{}", thread);
                (0..PER_THREAD)
                    .map(|_| {
                        let request = queued(&owner, LIMIT as i32);
                        let id = request.id();
                        ctx.queue.enqueue(vec![request]);
                        id
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let completer = {
            let ctx = ctx.clone();
            scope.spawn(move || {
                let mut completed = 0;
                while completed < THREADS * PER_THREAD {
                    let activated = ctx.queue.activated_requests();
                    let mut per_owner: HashMap<&Owner, usize> = HashMap::new();
                    for request in &activated {
                        *per_owner.entry(request.owner()).or_insert(0) += 1;
                    }
                    assert!(per_owner.values().all(|count| *count <= LIMIT));

                    match activated.last() {
                        Some(oldest) => {
                            if ctx.queue.complete(oldest.id()) {
                                completed += 1;
                            }
                        }
                        None => std::thread::yield_now(),
                    }
                }
            })
        };

        for (thread, handle) in handles.into_iter().enumerate() {
            expected.insert(Owner::new(format!("owner-{}", thread)), handle.join().unwrap());
        }
        completer.join().unwrap();
    });

    assert_eq!(ctx.queue.activated_request_count(), 0);
    assert!(ctx.queue.queued_requests().is_empty());

    let mut started: HashMap<Owner, Vec<_>> = HashMap::new();
    for record in ctx.controllers.starts() {
        started.entry(record.owner).or_default().push(record.request_id);
    }
    assert_eq!(started, expected);
}

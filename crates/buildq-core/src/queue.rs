// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The build queue.
//!
//! [`BuildQueue`] holds the queued and activated request lists behind one
//! lock. Every mutating operation runs under that lock and finishes with an
//! activation pass, so a request activates as soon as its last blocking
//! predicate clears.
//!
//! Both lists are stored newest first. Activation scans the queued list from
//! the tail (oldest first) and moves every satisfied request to the head of
//! the activated list as it goes, so later checks in the same pass already
//! see the earlier activations. Controllers are started after the scan, in
//! activation order.
//!
//! Several mutations can be applied atomically through [`BuildQueue::pause`]:
//!
//! ```ignore
//! let mut paused = queue.pause();
//! paused.cancel(first);
//! paused.cancel(second);
//! paused.resume(); // one activation pass covering both cancellations
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, info, warn};

use crate::controller::{BuildControllerFactory, REJECTED_WITH_FAILURE};
use crate::events::{EventPublisher, NoopPublisher, QueueEvent};
use crate::holder::{ActivatedRequest, QueuedRequest, RequestHolder};
use crate::predicate::QueueView;
use crate::registry::BuildRequestRegistry;
use crate::request::{BuildRequest, MetaBuildId, Owner, RequestId};

/// Result of [`BuildQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Every request was merged into a pending request. Pairs are
    /// `(source, target)`.
    Assimilated(Vec<(RequestId, RequestId)>),
    /// The requests were inserted into the queue, in batch order.
    Queued(Vec<RequestId>),
}

impl EnqueueOutcome {
    /// Whether the batch was assimilated.
    pub fn is_assimilated(&self) -> bool {
        matches!(self, Self::Assimilated(_))
    }
}

/// A point-in-time copy of the queue.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// Queued requests, newest first.
    pub queued: Vec<QueuedRequest>,
    /// Activated requests, newest first.
    pub activated: Vec<ActivatedRequest>,
}

impl QueueView for QueueSnapshot {
    fn queued(&self) -> &[QueuedRequest] {
        &self.queued
    }

    fn activated(&self) -> &[ActivatedRequest] {
        &self.activated
    }
}

#[derive(Default)]
struct QueueState {
    queued: Vec<QueuedRequest>,
    activated: Vec<ActivatedRequest>,
    paused: bool,
    stopped: bool,
}

impl QueueView for QueueState {
    fn queued(&self) -> &[QueuedRequest] {
        &self.queued
    }

    fn activated(&self) -> &[ActivatedRequest] {
        &self.activated
    }
}

impl QueueState {
    fn queued_position(&self, id: RequestId) -> Option<usize> {
        self.queued.iter().position(|queued| queued.id() == id)
    }

    fn activated_position(&self, id: RequestId) -> Option<usize> {
        self.activated.iter().position(|activated| activated.id() == id)
    }

    fn request(&self, id: RequestId) -> Option<BuildRequest> {
        self.queued
            .iter()
            .map(RequestHolder::request)
            .chain(self.activated.iter().map(RequestHolder::request))
            .find(|request| request.id() == id)
            .cloned()
    }

    fn requests_by_owner(&self, owner: &Owner) -> Vec<BuildRequest> {
        self.queued
            .iter()
            .map(RequestHolder::request)
            .chain(self.activated.iter().map(RequestHolder::request))
            .filter(|request| request.owner() == owner)
            .cloned()
            .collect()
    }

    fn has_request(&self, owner: &Owner) -> bool {
        self.queued.iter().any(|queued| queued.owner() == owner)
            || self.activated.iter().any(|activated| activated.owner() == owner)
    }

    /// Latest pending request with the same owner and source: newest queued
    /// first, then newest activated.
    fn assimilation_target(&self, source: &BuildRequest) -> Option<Target> {
        if let Some(index) = self
            .queued
            .iter()
            .position(|queued| queued.request().has_owner_and_source(source))
        {
            return Some(Target::Queued(index));
        }
        self.activated
            .iter()
            .position(|activated| activated.request().has_owner_and_source(source))
            .map(Target::Activated)
    }

    fn target_request(&self, target: Target) -> &BuildRequest {
        match target {
            Target::Queued(index) => self.queued[index].request(),
            Target::Activated(index) => self.activated[index].request(),
        }
    }

    fn target_request_mut(&mut self, target: Target) -> &mut BuildRequest {
        match target {
            Target::Queued(index) => self.queued[index].request_mut(),
            Target::Activated(index) => self.activated[index].request_mut(),
        }
    }

    fn target_commenced(&self, target: Target) -> bool {
        match target {
            Target::Queued(_) => false,
            Target::Activated(index) => self.activated[index].is_commenced(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Queued(usize),
    Activated(usize),
}

/// The build queue and activation engine.
pub struct BuildQueue {
    state: Mutex<QueueState>,
    /// Thread holding the live [`PausedQueue`], kept outside `state` so
    /// re-entry can be detected without blocking on the state lock.
    paused_by: Mutex<Option<ThreadId>>,
    controllers: Arc<dyn BuildControllerFactory>,
    registry: Arc<dyn BuildRequestRegistry>,
    events: Arc<dyn EventPublisher>,
}

impl BuildQueue {
    /// Create an empty queue starting builds through `controllers` and
    /// reporting lifecycle transitions to `registry`.
    pub fn new(
        controllers: Arc<dyn BuildControllerFactory>,
        registry: Arc<dyn BuildRequestRegistry>,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            paused_by: Mutex::new(None),
            controllers,
            registry,
            events: Arc::new(NoopPublisher),
        }
    }

    /// Publish activation events to `events`.
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        assert!(
            !self.paused_by_current_thread(),
            "build queue accessed directly while paused by this thread"
        );
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pause_owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.paused_by.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn paused_by_current_thread(&self) -> bool {
        *self.pause_owner() == Some(thread::current().id())
    }

    /// Enqueue a batch of requests.
    ///
    /// If every request in the batch can be assimilated into a pending
    /// request, nothing is inserted. Otherwise all requests are queued; those
    /// earlier in the batch get the first chance to activate.
    pub fn enqueue(&self, requests: Vec<QueuedRequest>) -> EnqueueOutcome {
        let mut state = self.lock();
        self.enqueue_locked(&mut state, requests)
    }

    /// Mark the activated request running build `build_result_id` as
    /// commenced. It no longer takes part in assimilation.
    ///
    /// Returns the request as frozen at this point, including any revision
    /// it picked up through assimilation, or `None` if no activated request
    /// runs this build.
    pub fn commencing(&self, build_result_id: u64) -> Option<BuildRequest> {
        let mut state = self.lock();
        Self::commencing_locked(&mut state, build_result_id)
    }

    /// Cancel a queued request.
    ///
    /// Returns false, changing nothing, if no queued request has this id.
    /// Activated requests cannot be cancelled here.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let mut state = self.lock();
        self.cancel_locked(&mut state, request_id)
    }

    /// Remove a finished activated request.
    ///
    /// Returns false, changing nothing, if no activated request has this id.
    pub fn complete(&self, request_id: RequestId) -> bool {
        let mut state = self.lock();
        self.complete_locked(&mut state, request_id)
    }

    /// Permanently stop activating requests.
    pub fn stop(&self) {
        self.lock().stopped = true;
        info!("Build queue stopped");
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Lock the queue and suspend activation until the returned guard is
    /// resumed or dropped.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the pause. A pause held by
    /// another thread is waited for.
    pub fn pause(&self) -> PausedQueue<'_> {
        assert!(
            !self.paused_by_current_thread(),
            "build queue is already paused"
        );
        let mut state = self.lock();
        state.paused = true;
        *self.pause_owner() = Some(thread::current().id());
        debug!("Build queue activation paused");
        PausedQueue { queue: self, state }
    }

    /// Queued requests, newest first.
    pub fn queued_requests(&self) -> Vec<QueuedRequest> {
        self.lock().queued.clone()
    }

    /// Queued requests of `owner`, newest first.
    pub fn queued_requests_by_owner(&self, owner: &Owner) -> Vec<QueuedRequest> {
        self.lock()
            .queued
            .iter()
            .filter(|queued| queued.owner() == owner)
            .cloned()
            .collect()
    }

    /// Activated requests, newest first.
    pub fn activated_requests(&self) -> Vec<ActivatedRequest> {
        self.lock().activated.clone()
    }

    /// Activated requests of `owner`, newest first.
    pub fn activated_requests_by_owner(&self, owner: &Owner) -> Vec<ActivatedRequest> {
        self.lock()
            .activated
            .iter()
            .filter(|activated| activated.owner() == owner)
            .cloned()
            .collect()
    }

    /// Number of activated requests.
    pub fn activated_request_count(&self) -> usize {
        self.lock().activated.len()
    }

    /// Queued then activated requests belonging to `meta_build_id`.
    pub fn meta_build_requests(&self, meta_build_id: MetaBuildId) -> Vec<BuildRequest> {
        let state = self.lock();
        state
            .queued
            .iter()
            .map(RequestHolder::request)
            .chain(state.activated.iter().map(RequestHolder::request))
            .filter(|request| request.meta_build_id() == Some(meta_build_id))
            .cloned()
            .collect()
    }

    /// The queued or activated request with this id.
    pub fn request(&self, request_id: RequestId) -> Option<BuildRequest> {
        self.lock().request(request_id)
    }

    /// Queued then activated requests of `owner`.
    pub fn requests_by_owner(&self, owner: &Owner) -> Vec<BuildRequest> {
        self.lock().requests_by_owner(owner)
    }

    /// Whether `owner` has a queued or activated request.
    pub fn has_request(&self, owner: &Owner) -> bool {
        self.lock().has_request(owner)
    }

    /// Copy of the current queue state.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            queued: state.queued.clone(),
            activated: state.activated.clone(),
        }
    }

    fn enqueue_locked(&self, state: &mut QueueState, requests: Vec<QueuedRequest>) -> EnqueueOutcome {
        if requests.is_empty() {
            return EnqueueOutcome::Queued(Vec::new());
        }

        if let Some(pairs) = self.assimilate(state, &requests) {
            return EnqueueOutcome::Assimilated(pairs);
        }

        let mut ids = Vec::with_capacity(requests.len());
        for queued in requests {
            debug!(
                request_id = %queued.id(),
                owner = %queued.owner(),
                predicates = queued.predicates().len(),
                "Request queued"
            );
            self.registry.request_queued(queued.request());
            ids.push(queued.id());
            state.queued.insert(0, queued);
        }

        self.activate(state);
        EnqueueOutcome::Queued(ids)
    }

    /// Assimilate the whole batch or nothing.
    fn assimilate(
        &self,
        state: &mut QueueState,
        requests: &[QueuedRequest],
    ) -> Option<Vec<(RequestId, RequestId)>> {
        let mut targets = Vec::with_capacity(requests.len());
        for source in requests {
            if !source.request().is_replaceable() {
                return None;
            }
            let target = state.assimilation_target(source.request())?;
            if !state.target_request(target).is_replaceable() || state.target_commenced(target) {
                return None;
            }
            targets.push((source.request(), target));
        }

        let mut pairs = Vec::with_capacity(targets.len());
        for (source, target) in targets {
            let target_request = state.target_request_mut(target);
            target_request.set_revision(source.revision().clone());
            let target_id = target_request.id();

            debug!(
                request_id = %source.id(),
                target_id = %target_id,
                owner = %source.owner(),
                "Request assimilated"
            );
            self.registry.request_assimilated(source, target_id);
            pairs.push((source.id(), target_id));
        }
        Some(pairs)
    }

    fn commencing_locked(state: &mut QueueState, build_result_id: u64) -> Option<BuildRequest> {
        let activated = state
            .activated
            .iter_mut()
            .find(|activated| activated.build_result_id() == Some(build_result_id))?;
        debug!(request_id = %activated.id(), build_result_id, "Build commencing");
        activated.build_commenced();
        Some(activated.request().clone())
    }

    fn cancel_locked(&self, state: &mut QueueState, request_id: RequestId) -> bool {
        let Some(index) = state.queued_position(request_id) else {
            return false;
        };
        let cancelled = state.queued.remove(index);
        debug!(request_id = %request_id, owner = %cancelled.owner(), "Request cancelled");
        self.registry.request_cancelled(cancelled.request());

        self.activate(state);
        true
    }

    fn complete_locked(&self, state: &mut QueueState, request_id: RequestId) -> bool {
        let Some(index) = state.activated_position(request_id) else {
            return false;
        };
        let completed = state.activated.remove(index);
        debug!(
            request_id = %request_id,
            owner = %completed.owner(),
            build_number = ?completed.build_number(),
            "Request completed"
        );

        self.activate(state);
        true
    }

    /// Activate every queued request whose predicates hold, then start their
    /// builds.
    fn activate(&self, state: &mut QueueState) {
        if state.paused || state.stopped {
            return;
        }

        // Oldest first, evaluated against the live state.
        let candidates: Vec<RequestId> = state.queued.iter().rev().map(|queued| queued.id()).collect();
        let mut activated_ids = Vec::new();
        for id in candidates {
            let Some(index) = state.queued_position(id) else {
                continue;
            };
            if state.queued[index].satisfied(&*state) {
                let queued = state.queued.remove(index);
                state.activated.insert(0, ActivatedRequest::new(queued.into_request()));
                activated_ids.push(id);
            }
        }

        for id in activated_ids {
            let Some(index) = state.activated_position(id) else {
                continue;
            };
            let controller = self.controllers.create(state.activated[index].request());
            match controller.start() {
                Some(build_number) => {
                    let activated = &mut state.activated[index];
                    activated.attach_controller(controller, build_number);
                    info!(
                        request_id = %id,
                        owner = %activated.owner(),
                        build_number,
                        "Request activated"
                    );
                    self.registry.request_activated(activated.request(), build_number);
                    self.events.publish(QueueEvent::BuildActivated {
                        request_id: id,
                        owner: activated.owner().clone(),
                        meta_build_id: activated.meta_build_id(),
                        build_number,
                    });
                }
                None => {
                    let rejected = state.activated.remove(index);
                    warn!(request_id = %id, owner = %rejected.owner(), "Build controller rejected request");
                    self.registry
                        .request_rejected(rejected.request(), REJECTED_WITH_FAILURE);
                }
            }
        }
    }
}

/// The queue, locked with activation suspended.
///
/// Mutations applied through the guard do not activate anything. Resuming,
/// or dropping the guard, lifts the pause and runs a single activation pass
/// before the lock is released.
pub struct PausedQueue<'a> {
    queue: &'a BuildQueue,
    state: MutexGuard<'a, QueueState>,
}

impl PausedQueue<'_> {
    /// See [`BuildQueue::enqueue`].
    pub fn enqueue(&mut self, requests: Vec<QueuedRequest>) -> EnqueueOutcome {
        self.queue.enqueue_locked(&mut self.state, requests)
    }

    /// See [`BuildQueue::cancel`].
    pub fn cancel(&mut self, request_id: RequestId) -> bool {
        self.queue.cancel_locked(&mut self.state, request_id)
    }

    /// See [`BuildQueue::complete`].
    pub fn complete(&mut self, request_id: RequestId) -> bool {
        self.queue.complete_locked(&mut self.state, request_id)
    }

    /// See [`BuildQueue::commencing`].
    pub fn commencing(&mut self, build_result_id: u64) -> Option<BuildRequest> {
        BuildQueue::commencing_locked(&mut self.state, build_result_id)
    }

    /// See [`BuildQueue::queued_requests`].
    pub fn queued_requests(&self) -> Vec<QueuedRequest> {
        self.state.queued.clone()
    }

    /// See [`BuildQueue::activated_requests`].
    pub fn activated_requests(&self) -> Vec<ActivatedRequest> {
        self.state.activated.clone()
    }

    /// See [`BuildQueue::request`].
    pub fn request(&self, request_id: RequestId) -> Option<BuildRequest> {
        self.state.request(request_id)
    }

    /// See [`BuildQueue::requests_by_owner`].
    pub fn requests_by_owner(&self, owner: &Owner) -> Vec<BuildRequest> {
        self.state.requests_by_owner(owner)
    }

    /// See [`BuildQueue::has_request`].
    pub fn has_request(&self, owner: &Owner) -> bool {
        self.state.has_request(owner)
    }

    /// Lift the pause and run one activation pass.
    pub fn resume(self) {}
}

impl Drop for PausedQueue<'_> {
    fn drop(&mut self) {
        self.state.paused = false;
        debug!("Build queue activation resumed");
        // Leave the state untouched when unwinding out of the paused section.
        if !thread::panicking() {
            self.queue.activate(&mut self.state);
        }
        *self.queue.pause_owner() = None;
    }
}

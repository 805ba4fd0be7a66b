// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue entries wrapping a [`BuildRequest`].
//!
//! A [`QueuedRequest`] carries the predicates it must satisfy before it may
//! activate. Once activated it becomes an [`ActivatedRequest`], which carries
//! the controller running its build. The transition is one way.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::controller::BuildController;
use crate::predicate::{QueuePredicate, QueueView};
use crate::request::{BuildRequest, MetaBuildId, Owner, RequestId};

/// Common accessors for anything holding a build request.
pub trait RequestHolder {
    /// The wrapped request.
    fn request(&self) -> &BuildRequest;

    /// The wrapped request's id.
    fn id(&self) -> RequestId {
        self.request().id()
    }

    /// The wrapped request's owner.
    fn owner(&self) -> &Owner {
        self.request().owner()
    }

    /// The wrapped request's meta-build id.
    fn meta_build_id(&self) -> Option<MetaBuildId> {
        self.request().meta_build_id()
    }
}

/// A request waiting in the queue for its predicates to clear.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    request: BuildRequest,
    predicates: Vec<QueuePredicate>,
}

impl QueuedRequest {
    /// Wrap `request` with an initial set of predicates.
    pub fn new(request: BuildRequest, predicates: Vec<QueuePredicate>) -> Self {
        let mut queued = Self {
            request,
            predicates: Vec::with_capacity(predicates.len()),
        };
        for predicate in predicates {
            queued.add_predicate(predicate);
        }
        queued
    }

    /// The predicates gating activation, in registration order.
    pub fn predicates(&self) -> &[QueuePredicate] {
        &self.predicates
    }

    /// Append a predicate. Registering an equal predicate twice is a no-op.
    pub fn add_predicate(&mut self, predicate: QueuePredicate) {
        if !self.predicates.contains(&predicate) {
            self.predicates.push(predicate);
        }
    }

    /// Whether every predicate holds against the current queue state.
    pub fn satisfied<V: QueueView + ?Sized>(&self, view: &V) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.satisfied(self, view))
    }

    /// Mutable access to the request, before it is queued.
    pub fn request_mut(&mut self) -> &mut BuildRequest {
        &mut self.request
    }

    /// Unwrap the request.
    pub fn into_request(self) -> BuildRequest {
        self.request
    }
}

impl RequestHolder for QueuedRequest {
    fn request(&self) -> &BuildRequest {
        &self.request
    }
}

/// A request whose build has been handed to a controller.
#[derive(Clone)]
pub struct ActivatedRequest {
    request: BuildRequest,
    controller: Option<Arc<dyn BuildController>>,
    build_number: Option<u64>,
    commenced: bool,
    activated_at: DateTime<Utc>,
}

impl fmt::Debug for ActivatedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivatedRequest")
            .field("request", &self.request)
            .field("controller", &self.controller.as_ref().map(|_| "..."))
            .field("build_number", &self.build_number)
            .field("commenced", &self.commenced)
            .field("activated_at", &self.activated_at)
            .finish()
    }
}

impl ActivatedRequest {
    pub(crate) fn new(request: BuildRequest) -> Self {
        Self {
            request,
            controller: None,
            build_number: None,
            commenced: false,
            activated_at: Utc::now(),
        }
    }

    /// The controller running this request's build, once started.
    pub fn controller(&self) -> Option<&Arc<dyn BuildController>> {
        self.controller.as_ref()
    }

    /// The build number assigned when the build started.
    pub fn build_number(&self) -> Option<u64> {
        self.build_number
    }

    /// The result id of the running build, once started.
    pub fn build_result_id(&self) -> Option<u64> {
        self.controller
            .as_ref()
            .map(|controller| controller.build_result_id())
    }

    /// Whether the build has started running. Commenced requests no longer
    /// take part in assimilation.
    pub fn is_commenced(&self) -> bool {
        self.commenced
    }

    /// When the request was activated.
    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }

    pub(crate) fn attach_controller(&mut self, controller: Arc<dyn BuildController>, build_number: u64) {
        assert!(
            self.controller.is_none(),
            "activated request {} already has a build controller",
            self.request.id()
        );
        self.controller = Some(controller);
        self.build_number = Some(build_number);
    }

    pub(crate) fn build_commenced(&mut self) {
        self.commenced = true;
    }

    pub(crate) fn request_mut(&mut self) -> &mut BuildRequest {
        &mut self.request
    }
}

impl RequestHolder for ActivatedRequest {
    fn request(&self) -> &BuildRequest {
        &self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BuildReason, TriggerOptions};
    use crate::revision::{BuildRevision, Revision};

    fn request(owner: &str) -> BuildRequest {
        BuildRequest::new(
            Owner::new(owner),
            BuildRevision::fixed(Revision::new("1")),
            TriggerOptions::new(
                BuildReason::Trigger {
                    name: "scm".to_string(),
                },
                "scm",
            ),
        )
    }

    #[test]
    fn test_duplicate_predicates_are_ignored() {
        let mut queued = QueuedRequest::new(
            request("app"),
            vec![
                QueuePredicate::HeadOfOwnerQueue,
                QueuePredicate::HeadOfOwnerQueue,
            ],
        );
        queued.add_predicate(QueuePredicate::DependencyComplete {
            owner: Owner::new("lib"),
        });
        queued.add_predicate(QueuePredicate::DependencyComplete {
            owner: Owner::new("lib"),
        });
        assert_eq!(queued.predicates().len(), 2);
    }

    #[test]
    fn test_activated_request_starts_without_controller() {
        let activated = ActivatedRequest::new(request("app"));
        assert!(activated.controller().is_none());
        assert!(activated.build_number().is_none());
        assert!(activated.build_result_id().is_none());
        assert!(!activated.is_commenced());
    }
}

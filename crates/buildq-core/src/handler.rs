// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Expansion of a build request into the requests of a multi-project build.
//!
//! [`ExtendedBuildRequestHandler::prepare`] stamps a fresh meta-build id on
//! the incoming request and produces one [`QueuedRequest`] per project
//! involved:
//!
//! - for a rebuild, every upstream dependency, ordered leaves first, each
//!   waiting on the dependencies below it;
//! - every downstream project triggered by the request's project, ordered
//!   breadth first, each waiting on the project that triggered it.
//!
//! The requested project itself appears exactly once, between the two lists.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::holder::{QueuedRequest, RequestHolder};
use crate::predicate::QueuePredicate;
use crate::project::{ProjectGraph, ProjectTree, RevisionHandling};
use crate::registry::BuildRequestRegistry;
use crate::request::{BuildReason, BuildRequest, MetaBuildId, Owner};
use crate::revision::{BuildRevision, LatestScmRevisionSupplier, ScmManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upstream,
    Downstream,
}

/// Prepares non-personal build requests for the queue.
pub struct ExtendedBuildRequestHandler {
    projects: Arc<ProjectGraph>,
    registry: Arc<dyn BuildRequestRegistry>,
    scm: Arc<dyn ScmManager>,
}

impl ExtendedBuildRequestHandler {
    /// Create a handler over the given project graph.
    pub fn new(
        projects: Arc<ProjectGraph>,
        registry: Arc<dyn BuildRequestRegistry>,
        scm: Arc<dyn ScmManager>,
    ) -> Self {
        Self {
            projects,
            registry,
            scm,
        }
    }

    /// The project graph requests are expanded against.
    pub fn projects(&self) -> &ProjectGraph {
        &self.projects
    }

    /// Expand `request` into the ordered batch to enqueue.
    ///
    /// Fails with [`Error::AlreadyHandled`] if the request already carries a
    /// meta-build id, and with [`Error::UnknownProject`] if its owner is not
    /// in the project graph.
    pub fn prepare(&self, mut request: BuildRequest) -> Result<Vec<QueuedRequest>> {
        if let Some(meta_build_id) = request.meta_build_id() {
            return Err(Error::AlreadyHandled {
                request_id: request.id(),
                meta_build_id,
            });
        }
        if !self.projects.contains(request.owner()) {
            return Err(Error::UnknownProject(request.owner().clone()));
        }

        request.set_meta_build_id(MetaBuildId::next());
        self.registry.register(&request);

        let mut upstream = Vec::new();
        let mut upstream_root = None;
        if request.options().rebuild {
            let tree = self.projects.upstream_tree(request.owner())?;
            upstream = self.prepare_upstream(&request, &tree);
            upstream_root = upstream.pop();
        }

        let tree = self.projects.downstream_tree(request.owner())?;
        let mut downstream = self.prepare_downstream(&request, &tree).into_iter();
        let downstream_root = downstream.next();

        let mut batch = upstream;
        batch.extend(upstream_root.or(downstream_root));
        batch.extend(downstream);

        info!(
            request_id = %request.id(),
            owner = %request.owner(),
            meta_build_id = ?request.meta_build_id(),
            requests = batch.len(),
            "Build request prepared"
        );
        Ok(batch)
    }

    fn prepare_upstream(&self, original: &BuildRequest, tree: &ProjectTree) -> Vec<QueuedRequest> {
        let mut requests: Vec<QueuedRequest> = Vec::new();
        let mut by_owner: HashMap<Owner, usize> = HashMap::new();

        // Leaves first; each project waits for the dependencies below it.
        for node in tree.depth_first() {
            let owner = tree.owner(node);
            let position = match by_owner.get(owner) {
                Some(position) => *position,
                None => {
                    let request = self.request_for(original, owner, Direction::Upstream);
                    requests.push(self.queued(request));
                    by_owner.insert(owner.clone(), requests.len() - 1);
                    requests.len() - 1
                }
            };

            for child in tree.children(node) {
                wait_for(&mut requests[position], child);
            }
        }

        for node in tree.breadth_first() {
            let owner = tree.owner(node);
            let Some(trigger) = self.projects.dependent_trigger(owner) else {
                continue;
            };
            let revision = requests[by_owner[owner]].request().revision().clone();
            let propagate = trigger.revision_handling == RevisionHandling::PropagateFromUpstream;
            let chain = trigger.revision_handling == RevisionHandling::FixWithUpstream
                && !revision.is_initialised();
            if !propagate && !chain {
                continue;
            }

            for child in tree.children(node) {
                let child_request = requests[by_owner[child]].request_mut();
                if propagate {
                    child_request.set_revision(revision.clone());
                } else {
                    child_request
                        .revision()
                        .add_dependent_revision(revision.clone());
                }
            }
        }

        requests
    }

    fn prepare_downstream(&self, original: &BuildRequest, tree: &ProjectTree) -> Vec<QueuedRequest> {
        let mut requests: Vec<QueuedRequest> = Vec::new();
        let mut by_owner: HashMap<Owner, usize> = HashMap::new();

        for node in tree.breadth_first() {
            let owner = tree.owner(node);
            let parent = tree.parent(node);

            if !by_owner.contains_key(owner) {
                let mut request = self.request_for(original, owner, Direction::Downstream);

                if let Some(parent) = parent
                    && let Some(trigger) = self.projects.dependent_trigger(owner)
                {
                    let upstream = requests[by_owner[parent]].request();
                    if trigger.propagate_status {
                        request.options_mut().status = upstream.options().status.clone();
                    }
                    if trigger.propagate_version {
                        request.options_mut().version = upstream.options().version.clone();
                    }

                    let upstream_revision = upstream.revision().clone();
                    match trigger.revision_handling {
                        RevisionHandling::PropagateFromUpstream => {
                            request.set_revision(upstream_revision);
                        }
                        RevisionHandling::FixWithUpstream if !upstream_revision.is_initialised() => {
                            upstream_revision.add_dependent_revision(request.revision().clone());
                        }
                        _ => {}
                    }
                }

                requests.push(self.queued(request));
                by_owner.insert(owner.clone(), requests.len() - 1);
            }

            if let Some(parent) = parent {
                wait_for(&mut requests[by_owner[owner]], parent);
            }
        }

        requests
    }

    /// The original request for its own project, a registered clone for any
    /// other project.
    fn request_for(&self, original: &BuildRequest, owner: &Owner, direction: Direction) -> BuildRequest {
        if original.owner() == owner {
            return original.clone();
        }

        let mut options = original.options().clone();
        let from = original.owner().clone();
        options.reason = match direction {
            Direction::Upstream => BuildReason::Rebuild { from },
            Direction::Downstream => BuildReason::Dependency { from },
        };
        let revision = BuildRevision::lazy(Arc::new(LatestScmRevisionSupplier::new(
            owner.clone(),
            self.scm.clone(),
        )));

        let mut request = BuildRequest::new(owner.clone(), revision, options);
        if let Some(meta_build_id) = original.meta_build_id() {
            request.set_meta_build_id(meta_build_id);
        }
        debug!(
            request_id = %request.id(),
            owner = %owner,
            original_id = %original.id(),
            direction = ?direction,
            "Cloned build request"
        );
        self.registry.register(&request);
        request
    }

    /// Wrap a request with its owner's default predicates.
    fn queued(&self, request: BuildRequest) -> QueuedRequest {
        let limit = self.projects.concurrent_builds(request.owner());
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
}

fn wait_for(queued: &mut QueuedRequest, owner: &Owner) {
    queued.request_mut().add_dependent_owner(owner.clone());
    queued.add_predicate(QueuePredicate::DependencyComplete {
        owner: owner.clone(),
    });
}

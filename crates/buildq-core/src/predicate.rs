// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Activation predicates.
//!
//! Every queued request carries a list of [`QueuePredicate`]s; it activates
//! once all of them hold. Predicates are evaluated against a [`QueueView`] of
//! the live queue state on every activation pass and never cache results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::holder::{ActivatedRequest, QueuedRequest, RequestHolder};
use crate::request::Owner;

/// Read access to queue state for predicate evaluation.
///
/// Both lists are ordered newest first.
pub trait QueueView {
    /// Currently queued requests, most recently queued first.
    fn queued(&self) -> &[QueuedRequest];

    /// Currently activated requests, most recently activated first.
    fn activated(&self) -> &[ActivatedRequest];
}

/// A condition a queued request must satisfy before it may activate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueuePredicate {
    /// Fewer than `limit` builds of the same owner may be active.
    /// Zero or negative means unlimited.
    ActiveBuildsPerOwner {
        /// Maximum concurrent activated requests for the owner.
        limit: i32,
    },
    /// Only the oldest queued request of an owner may activate.
    HeadOfOwnerQueue,
    /// Only the oldest queue-jumping request of an owner may activate;
    /// requests that may not jump do not hold it back.
    HeadOfOwnerCanJump,
    /// No request of `owner` remains queued or active within the same
    /// meta-build.
    DependencyComplete {
        /// The owner that must finish first.
        owner: Owner,
    },
}

impl QueuePredicate {
    /// Evaluate the predicate for `request` against `view`.
    pub fn satisfied<V: QueueView + ?Sized>(&self, request: &QueuedRequest, view: &V) -> bool {
        match self {
            Self::ActiveBuildsPerOwner { limit } => {
                if *limit <= 0 {
                    return true;
                }
                let active = view
                    .activated()
                    .iter()
                    .filter(|activated| activated.owner() == request.owner())
                    .count();
                active < *limit as usize
            }
            Self::HeadOfOwnerQueue => view
                .queued()
                .iter()
                .rev()
                .find(|queued| queued.owner() == request.owner())
                .is_some_and(|head| head.id() == request.id()),
            Self::HeadOfOwnerCanJump => view
                .queued()
                .iter()
                .rev()
                .find(|queued| {
                    queued.owner() == request.owner() && queued.request().can_jump_queue()
                })
                .is_none_or(|head| head.id() == request.id()),
            Self::DependencyComplete { owner } => {
                let meta_build_id = request.meta_build_id();
                let pending = |holder: &dyn RequestHolder| {
                    holder.meta_build_id() == meta_build_id && holder.owner() == owner
                };
                !view.queued().iter().any(|queued| pending(queued))
                    && !view.activated().iter().any(|activated| pending(activated))
            }
        }
    }
}

impl fmt::Display for QueuePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActiveBuildsPerOwner { limit } if *limit <= 0 => {
                write!(f, "active builds per owner (unlimited)")
            }
            Self::ActiveBuildsPerOwner { limit } => write!(f, "active builds per owner < {}", limit),
            Self::HeadOfOwnerQueue => write!(f, "head of owner queue"),
            Self::HeadOfOwnerCanJump => write!(f, "head of owner queue (may jump)"),
            Self::DependencyComplete { owner } => write!(f, "dependency '{}' complete", owner),
        }
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build request value types.
//!
//! A [`BuildRequest`] identifies the project it targets, the revision to
//! build, the trigger options it was raised with and the meta-build it
//! belongs to. Requests are cloned per upstream/downstream project during
//! graph expansion; clones share the meta-build id of the original.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::revision::BuildRevision;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_META_BUILD_ID: AtomicU64 = AtomicU64::new(1);

/// The project (or other triggerable entity) a build request targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Owner(String);

impl Owner {
    /// Create an owner from a project name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The project name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Owner {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// System-wide unique build request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Allocate the next request id.
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier shared by every request spawned from one triggering action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaBuildId(pub u64);

impl MetaBuildId {
    /// Allocate the next meta-build id.
    pub fn next() -> Self {
        Self(NEXT_META_BUILD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MetaBuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a build was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildReason {
    /// Triggered by hand.
    Manual {
        /// Who asked for the build.
        user: String,
    },
    /// Fired by a configured trigger (SCM change, schedule, ...).
    Trigger {
        /// Trigger name.
        name: String,
    },
    /// Rebuild of an upstream dependency of `from`.
    Rebuild {
        /// The project whose rebuild caused this request.
        from: Owner,
    },
    /// Downstream build of a project depending on `from`.
    Dependency {
        /// The upstream project that triggered this request.
        from: Owner,
    },
}

impl fmt::Display for BuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual { user } => write!(f, "manual trigger by {}", user),
            Self::Trigger { name } => write!(f, "trigger '{}'", name),
            Self::Rebuild { from } => write!(f, "rebuild of dependencies of {}", from),
            Self::Dependency { from } => write!(f, "dependent of {}", from),
        }
    }
}

/// Options a build was triggered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOptions {
    /// Why the build was requested.
    pub reason: BuildReason,
    /// Identity of the trigger source; together with the owner this decides
    /// which requests may be assimilated into each other.
    pub source: String,
    /// Whether this request may be merged with an equivalent pending request.
    #[serde(default)]
    pub replaceable: bool,
    /// Whether upstream dependencies should be rebuilt first.
    #[serde(default)]
    pub rebuild: bool,
    /// Whether the request may skip ahead of older requests for its owner.
    #[serde(default)]
    pub jump_queue_allowed: bool,
    /// Status to stamp on the build, if propagated or forced.
    #[serde(default)]
    pub status: Option<String>,
    /// Version to stamp on the build, if propagated or forced.
    #[serde(default)]
    pub version: Option<String>,
}

impl TriggerOptions {
    /// Options for a build raised by `reason` from the given source.
    pub fn new(reason: BuildReason, source: impl Into<String>) -> Self {
        Self {
            reason,
            source: source.into(),
            replaceable: false,
            rebuild: false,
            jump_queue_allowed: false,
            status: None,
            version: None,
        }
    }

    /// Mark the request as replaceable.
    pub fn replaceable(mut self, replaceable: bool) -> Self {
        self.replaceable = replaceable;
        self
    }

    /// Request a rebuild of upstream dependencies.
    pub fn rebuild(mut self, rebuild: bool) -> Self {
        self.rebuild = rebuild;
        self
    }

    /// Allow the request to jump its owner's queue.
    pub fn jump_queue(mut self, allowed: bool) -> Self {
        self.jump_queue_allowed = allowed;
        self
    }

    /// Stamp a status.
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Stamp a version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// A request to build one owner at some revision.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    id: RequestId,
    owner: Owner,
    revision: BuildRevision,
    options: TriggerOptions,
    meta_build_id: Option<MetaBuildId>,
    dependent_owners: Vec<Owner>,
    created_at: DateTime<Utc>,
}

impl BuildRequest {
    /// Create a new request with a freshly allocated id.
    pub fn new(owner: Owner, revision: BuildRevision, options: TriggerOptions) -> Self {
        Self {
            id: RequestId::next(),
            owner,
            revision,
            options,
            meta_build_id: None,
            dependent_owners: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// The request id.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The owner this request builds.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// The revision handle.
    pub fn revision(&self) -> &BuildRevision {
        &self.revision
    }

    /// Replace the revision handle.
    ///
    /// Used by assimilation and by revision propagation between projects.
    pub fn set_revision(&mut self, revision: BuildRevision) {
        self.revision = revision;
    }

    /// The trigger options.
    pub fn options(&self) -> &TriggerOptions {
        &self.options
    }

    /// Mutable trigger options, for status/version propagation.
    pub fn options_mut(&mut self) -> &mut TriggerOptions {
        &mut self.options
    }

    /// The trigger source identity.
    pub fn source(&self) -> &str {
        &self.options.source
    }

    /// Whether the request may be merged into an equivalent one.
    pub fn is_replaceable(&self) -> bool {
        self.options.replaceable
    }

    /// Whether the request may jump its owner's queue.
    pub fn can_jump_queue(&self) -> bool {
        self.options.jump_queue_allowed
    }

    /// The meta-build id, once a handler has processed the request.
    pub fn meta_build_id(&self) -> Option<MetaBuildId> {
        self.meta_build_id
    }

    /// Stamp the meta-build id.
    pub fn set_meta_build_id(&mut self, meta_build_id: MetaBuildId) {
        self.meta_build_id = Some(meta_build_id);
    }

    /// Owners that must leave the queue before this request may activate.
    pub fn dependent_owners(&self) -> &[Owner] {
        &self.dependent_owners
    }

    /// Record an owner this request waits on.
    pub fn add_dependent_owner(&mut self, owner: Owner) {
        if !self.dependent_owners.contains(&owner) {
            self.dependent_owners.push(owner);
        }
    }

    /// When the request was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether `other` targets the same owner from the same trigger source.
    pub fn has_owner_and_source(&self, other: &BuildRequest) -> bool {
        self.owner == other.owner && self.options.source == other.options.source
    }
}

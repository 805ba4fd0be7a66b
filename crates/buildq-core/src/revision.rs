// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lazily fixed build revisions.
//!
//! A [`BuildRevision`] is a shared handle. Requests cloned during graph
//! expansion start with an unresolved revision backed by the SCM; the
//! revision is fixed only when a build actually needs it, outside the queue
//! lock. Two requests holding the same handle always see the same revision,
//! and a revision can carry dependents that are fixed together with it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::request::Owner;

/// Errors raised while resolving a revision.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RevisionError {
    /// The SCM could not report a revision for the owner.
    #[error("No revision available for '{owner}': {reason}")]
    Unavailable {
        /// The owner whose revision was requested.
        owner: Owner,
        /// Why the lookup failed.
        reason: String,
    },
}

/// An SCM revision identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Create a revision from its SCM identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The SCM identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supplies a revision on demand.
pub trait RevisionSupplier: Send + Sync {
    /// Resolve the revision to build.
    fn revision(&self) -> Result<Revision, RevisionError>;
}

/// Access to the latest revision of each owner's SCM.
pub trait ScmManager: Send + Sync {
    /// The latest revision available for `owner`.
    fn latest_revision(&self, owner: &Owner) -> Result<Revision, RevisionError>;
}

/// Supplies the latest SCM revision of one owner at the time it is asked.
pub struct LatestScmRevisionSupplier {
    owner: Owner,
    scm: Arc<dyn ScmManager>,
}

impl LatestScmRevisionSupplier {
    /// Create a supplier for `owner`.
    pub fn new(owner: Owner, scm: Arc<dyn ScmManager>) -> Self {
        Self { owner, scm }
    }
}

impl RevisionSupplier for LatestScmRevisionSupplier {
    fn revision(&self) -> Result<Revision, RevisionError> {
        self.scm.latest_revision(&self.owner)
    }
}

/// In-memory SCM used for simulation and tests.
///
/// Each owner has a current revision that can be advanced; owners without a
/// recorded revision report `Unavailable`.
#[derive(Debug, Default)]
pub struct InMemoryScm {
    revisions: Mutex<HashMap<Owner, Revision>>,
}

impl InMemoryScm {
    /// Create an empty SCM.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latest revision of `owner`.
    pub fn set_revision(&self, owner: Owner, revision: Revision) {
        self.revisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner, revision);
    }
}

impl ScmManager for InMemoryScm {
    fn latest_revision(&self, owner: &Owner) -> Result<Revision, RevisionError> {
        self.revisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(owner)
            .cloned()
            .ok_or_else(|| RevisionError::Unavailable {
                owner: owner.clone(),
                reason: "no commits recorded".to_string(),
            })
    }
}

struct RevisionState {
    revision: Option<Revision>,
    fixed_at: Option<DateTime<Utc>>,
    supplier: Option<Arc<dyn RevisionSupplier>>,
    dependents: Vec<BuildRevision>,
}

/// Shared handle to a revision that is fixed at most once.
#[derive(Clone)]
pub struct BuildRevision {
    inner: Arc<Mutex<RevisionState>>,
}

impl fmt::Debug for BuildRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("BuildRevision")
            .field("revision", &state.revision)
            .field("fixed_at", &state.fixed_at)
            .field("dependents", &state.dependents.len())
            .finish()
    }
}

impl BuildRevision {
    /// A revision that is already fixed.
    pub fn fixed(revision: Revision) -> Self {
        Self::with_state(RevisionState {
            revision: Some(revision),
            fixed_at: Some(Utc::now()),
            supplier: None,
            dependents: Vec::new(),
        })
    }

    /// A revision resolved from `supplier` when first fixed.
    pub fn lazy(supplier: Arc<dyn RevisionSupplier>) -> Self {
        Self::with_state(RevisionState {
            revision: None,
            fixed_at: None,
            supplier: Some(supplier),
            dependents: Vec::new(),
        })
    }

    fn with_state(state: RevisionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RevisionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the revision has been fixed.
    pub fn is_initialised(&self) -> bool {
        self.state().revision.is_some()
    }

    /// The fixed revision, if any.
    pub fn revision(&self) -> Option<Revision> {
        self.state().revision.clone()
    }

    /// When the revision was fixed.
    pub fn fixed_at(&self) -> Option<DateTime<Utc>> {
        self.state().fixed_at
    }

    /// Whether both handles refer to the same shared revision.
    pub fn same_as(&self, other: &BuildRevision) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a revision to be fixed at the same time as this one.
    ///
    /// If this revision is already fixed the dependent is fixed immediately.
    pub fn add_dependent_revision(&self, dependent: BuildRevision) {
        if self.same_as(&dependent) {
            return;
        }
        let already_fixed = {
            let mut state = self.state();
            if state.revision.is_none() {
                state.dependents.push(dependent.clone());
                false
            } else {
                true
            }
        };
        if already_fixed {
            fix_dependent(&dependent);
        }
    }

    /// Fix the revision, resolving it from the supplier if necessary, then
    /// fix every dependent revision.
    pub fn fix(&self) -> Result<Revision, RevisionError> {
        let supplier = {
            let state = self.state();
            if let Some(revision) = &state.revision {
                return Ok(revision.clone());
            }
            state.supplier.clone()
        };

        let resolved = match supplier {
            Some(supplier) => supplier.revision()?,
            None => {
                return Err(RevisionError::Unavailable {
                    owner: Owner::new("<unknown>"),
                    reason: "revision has no supplier".to_string(),
                });
            }
        };

        let (revision, dependents) = {
            let mut state = self.state();
            // Another thread may have fixed it while the supplier ran.
            let revision = state.revision.get_or_insert(resolved).clone();
            if state.fixed_at.is_none() {
                state.fixed_at = Some(Utc::now());
            }
            (revision, std::mem::take(&mut state.dependents))
        };

        debug!(revision = %revision, dependents = dependents.len(), "Revision fixed");

        for dependent in &dependents {
            fix_dependent(dependent);
        }

        Ok(revision)
    }
}

fn fix_dependent(dependent: &BuildRevision) {
    if let Err(e) = dependent.fix() {
        warn!(error = %e, "Failed to fix dependent revision");
    }
}

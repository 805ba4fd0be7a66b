// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger definitions loaded from JSON.
//!
//! A trigger file is a JSON array:
//!
//! ```json
//! [
//!   { "project": "app", "reason": { "kind": "manual", "user": "alice" },
//!     "source": "manual", "rebuild": true },
//!   { "project": "lib", "revision": "abc123",
//!     "reason": { "kind": "trigger", "name": "scm" }, "source": "scm",
//!     "replaceable": true }
//! ]
//! ```

use std::path::Path;
use std::sync::Arc;

use buildq_core::revision::LatestScmRevisionSupplier;
use buildq_core::{BuildRequest, BuildRevision, Owner, Revision, ScmManager, TriggerOptions};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One build to trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Project to build.
    pub project: Owner,
    /// Revision to build; the latest SCM revision when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Trigger options.
    #[serde(flatten)]
    pub options: TriggerOptions,
}

impl TriggerSpec {
    /// Turn the trigger into a fresh build request.
    pub fn to_request(&self, scm: &Arc<dyn ScmManager>) -> BuildRequest {
        let revision = match &self.revision {
            Some(revision) => BuildRevision::fixed(Revision::new(revision.clone())),
            None => BuildRevision::lazy(Arc::new(LatestScmRevisionSupplier::new(
                self.project.clone(),
                scm.clone(),
            ))),
        };
        BuildRequest::new(self.project.clone(), revision, self.options.clone())
    }
}

/// Load trigger specs from a JSON string.
pub fn triggers_from_json(json: &str) -> Result<Vec<TriggerSpec>> {
    Ok(serde_json::from_str(json)?)
}

/// Load trigger specs from a JSON file.
pub fn load_triggers(path: impl AsRef<Path>) -> Result<Vec<TriggerSpec>> {
    let json = std::fs::read_to_string(path)?;
    triggers_from_json(&json)
}

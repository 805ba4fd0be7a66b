// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for buildq-runtime integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use buildq_core::project::DependentTriggerConfig;
use buildq_core::{
    BuildReason, BuildRequest, BuildRevision, InMemoryScm, Owner, ProjectConfig, ProjectGraph,
    QueueEvent, Revision, ScmManager, TriggerOptions,
};
use buildq_runtime::executor::MockExecutor;
use buildq_runtime::runtime::BuildRuntime;
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(5);

/// Runtime plus the executor and SCM it was started with.
pub struct TestRuntime {
    pub runtime: BuildRuntime,
    pub executor: Arc<MockExecutor>,
    pub scm: Arc<InMemoryScm>,
}

impl TestRuntime {
    pub async fn start(executor: MockExecutor, projects: Vec<ProjectConfig>) -> Self {
        let executor = Arc::new(executor);
        let scm = Arc::new(InMemoryScm::new());
        for project in &projects {
            scm.set_revision(
                project.name.clone(),
                Revision::new(format!("{}-1", project.name)),
            );
        }

        let runtime = BuildRuntime::builder()
            .executor(executor.clone())
            .projects(Arc::new(ProjectGraph::new(projects, 1).unwrap()))
            .scm(scm.clone() as Arc<dyn ScmManager>)
            .event_capacity(64)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        Self {
            runtime,
            executor,
            scm,
        }
    }

    pub async fn wait_until_idle(&self) {
        assert!(
            self.runtime.wait_until_idle(WAIT).await,
            "queue did not drain"
        );
    }
}

pub fn manual() -> TriggerOptions {
    TriggerOptions::new(
        BuildReason::Manual {
            user: "tester".to_string(),
        },
        "manual",
    )
}

pub fn scm_trigger() -> TriggerOptions {
    TriggerOptions::new(
        BuildReason::Trigger {
            name: "scm".to_string(),
        },
        "scm",
    )
    .replaceable(true)
}

/// Request for `owner` at a fixed revision.
pub fn request(owner: &str, options: TriggerOptions) -> BuildRequest {
    BuildRequest::new(
        Owner::new(owner),
        BuildRevision::fixed(Revision::new(format!("{}-fixed", owner))),
        options,
    )
}

pub fn project(name: &str) -> ProjectConfig {
    ProjectConfig::new(name)
}

pub fn triggered() -> DependentTriggerConfig {
    DependentTriggerConfig::default()
}

/// Next event, failing the test if none arrives in time.
pub async fn next_event(events: &mut broadcast::Receiver<QueueEvent>) -> QueueEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no event received")
        .expect("event channel closed")
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Buildq Simulate - runs a project graph and a list of triggers against a
//! mock executor and reports how every request was handled.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use buildq_core::{InMemoryScm, QueueEvent, Revision, ScmManager};
use buildq_runtime::config::Config;
use buildq_runtime::executor::{BuildExecutor, MockExecutor};
use buildq_runtime::runtime::BuildRuntime;
use buildq_runtime::trigger::load_triggers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buildq_runtime=info,buildq_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        projects_file = %config.projects_file.display(),
        simulated_build_ms = config.simulated_build_ms,
        "Starting build simulation"
    );

    let projects = buildq_core::ProjectGraph::from_file(
        &config.projects_file,
        config.core.default_concurrent_builds,
    )?;

    // Every project starts at its first revision
    let scm = Arc::new(InMemoryScm::new());
    for project in projects.projects() {
        scm.set_revision(
            project.name.clone(),
            Revision::new(format!("{}-1", project.name)),
        );
    }
    let scm: Arc<dyn ScmManager> = scm;

    let executor = Arc::new(MockExecutor::with_delay(config.simulated_build_ms));
    info!(executor_type = executor.executor_type(), "Executor initialized");

    let runtime = BuildRuntime::builder()
        .executor(executor)
        .projects(Arc::new(projects))
        .scm(scm.clone())
        .registry_capacity(config.core.registry_capacity)
        .event_capacity(config.event_capacity)
        .build()?
        .start()
        .await?;

    let mut events = runtime.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let triggers = match &config.triggers_file {
        Some(path) => load_triggers(path)?,
        None => Vec::new(),
    };
    info!(triggers = triggers.len(), "Triggering builds");

    for spec in &triggers {
        match runtime.trigger(spec.to_request(&scm)) {
            Ok(outcome) => info!(project = %spec.project, outcome = ?outcome, "Build triggered"),
            Err(e) => warn!(project = %spec.project, error = %e, "Trigger failed"),
        }
    }

    if !runtime.wait_until_idle(config.idle_timeout).await {
        warn!(
            timeout_secs = config.idle_timeout.as_secs(),
            "Queue did not drain before the timeout"
        );
    }

    let registry = runtime.registry().clone();
    runtime.shutdown().await?;
    // The channel closes once the runtime is gone
    let _ = tokio::time::timeout(Duration::from_secs(1), event_logger).await;

    let summary: BTreeMap<String, usize> = registry
        .summary()
        .into_iter()
        .map(|(status, count)| (format!("{:?}", status).to_lowercase(), count))
        .collect();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("Build simulation finished");

    Ok(())
}

fn log_event(event: &QueueEvent) {
    match event {
        QueueEvent::BuildActivated {
            request_id,
            owner,
            build_number,
            ..
        } => info!(
            request_id = %request_id,
            owner = %owner,
            build_number,
            "Build activated"
        ),
        QueueEvent::BuildCompleted {
            request_id,
            owner,
            build_number,
            succeeded,
        } => info!(
            request_id = %request_id,
            owner = %owner,
            build_number,
            succeeded,
            "Build completed"
        ),
    }
}

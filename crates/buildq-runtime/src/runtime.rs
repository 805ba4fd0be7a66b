// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime driving a build queue.
//!
//! [`BuildRuntime`] wires a [`BuildQueue`] to an executor: controllers push
//! started builds onto a channel, a dispatcher task runs each build and
//! reports `commencing` and `complete` back to the queue.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use buildq_core::ProjectGraph;
//! use buildq_runtime::executor::MockExecutor;
//! use buildq_runtime::runtime::BuildRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let projects = ProjectGraph::from_file("projects.json", 1)?;
//!
//!     let runtime = BuildRuntime::builder()
//!         .executor(Arc::new(MockExecutor::new()))
//!         .projects(Arc::new(projects))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... trigger builds ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use buildq_core::config::DEFAULT_REGISTRY_CAPACITY;
use buildq_core::{
    BroadcastPublisher, BuildQueue, BuildRequest, EnqueueOutcome, EventPublisher,
    ExtendedBuildRequestHandler, InMemoryRequestRegistry, InMemoryScm, ProjectGraph, QueueEvent,
    RequestId, ScmManager,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_EVENT_CAPACITY;
use crate::controller::DispatchingControllerFactory;
use crate::executor::{BuildExecutor, BuildJob, CancelToken, ExecutorError};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Builder for creating a [`BuildRuntime`].
pub struct BuildRuntimeBuilder {
    executor: Option<Arc<dyn BuildExecutor>>,
    projects: Option<Arc<ProjectGraph>>,
    scm: Option<Arc<dyn ScmManager>>,
    registry_capacity: usize,
    event_capacity: usize,
}

impl Default for BuildRuntimeBuilder {
    fn default() -> Self {
        Self {
            executor: None,
            projects: None,
            scm: None,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl BuildRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the executor that runs builds (required).
    pub fn executor(mut self, executor: Arc<dyn BuildExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the project graph requests are expanded against (required).
    pub fn projects(mut self, projects: Arc<ProjectGraph>) -> Self {
        self.projects = Some(projects);
        self
    }

    /// Set the SCM used to fix the revisions of cloned requests.
    ///
    /// Defaults to an empty [`InMemoryScm`].
    pub fn scm(mut self, scm: Arc<dyn ScmManager>) -> Self {
        self.scm = Some(scm);
        self
    }

    /// Set how many request records the registry keeps.
    pub fn registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    /// Set the capacity of the event broadcast channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<BuildRuntimeConfig> {
        let executor = self
            .executor
            .ok_or_else(|| anyhow::anyhow!("executor is required"))?;
        let projects = self
            .projects
            .ok_or_else(|| anyhow::anyhow!("projects is required"))?;
        if self.registry_capacity == 0 {
            anyhow::bail!("registry_capacity must be positive");
        }

        Ok(BuildRuntimeConfig {
            executor,
            projects,
            scm: self.scm.unwrap_or_else(|| Arc::new(InMemoryScm::new())),
            registry_capacity: self.registry_capacity,
            event_capacity: self.event_capacity,
        })
    }
}

/// Configuration for a [`BuildRuntime`].
pub struct BuildRuntimeConfig {
    executor: Arc<dyn BuildExecutor>,
    projects: Arc<ProjectGraph>,
    scm: Arc<dyn ScmManager>,
    registry_capacity: usize,
    event_capacity: usize,
}

impl BuildRuntimeConfig {
    /// Start the runtime, spawning the dispatcher task.
    pub async fn start(self) -> Result<BuildRuntime> {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let registry = Arc::new(InMemoryRequestRegistry::new(self.registry_capacity));
        let events = Arc::new(BroadcastPublisher::new(self.event_capacity));
        let controllers = Arc::new(DispatchingControllerFactory::new(
            self.executor.clone(),
            jobs_tx,
        ));
        let queue = Arc::new(
            BuildQueue::new(controllers, registry.clone()).with_events(events.clone()),
        );
        let handler =
            ExtendedBuildRequestHandler::new(self.projects.clone(), registry.clone(), self.scm);

        let shared = Arc::new(Shared {
            queue,
            events,
            executor: self.executor,
            running: Mutex::new(HashMap::new()),
        });

        let dispatcher_handle = tokio::spawn(run_dispatcher(shared.clone(), jobs_rx, shutdown_rx));

        info!(
            executor = shared.executor.executor_type(),
            projects = self.projects.projects().len(),
            "BuildRuntime started"
        );

        Ok(BuildRuntime {
            shared,
            handler,
            registry,
            dispatcher_handle,
            shutdown_tx,
        })
    }
}

/// State shared between the runtime handle and the dispatcher.
struct Shared {
    queue: Arc<BuildQueue>,
    events: Arc<BroadcastPublisher>,
    executor: Arc<dyn BuildExecutor>,
    running: Mutex<HashMap<RequestId, CancelToken>>,
}

impl Shared {
    fn running(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, CancelToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_running(&self) -> usize {
        let running = self.running();
        for token in running.values() {
            token.store(true, Ordering::SeqCst);
        }
        running.len()
    }
}

/// Running build queue with its dispatcher.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct BuildRuntime {
    shared: Arc<Shared>,
    handler: ExtendedBuildRequestHandler,
    registry: Arc<InMemoryRequestRegistry>,
    dispatcher_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl BuildRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> BuildRuntimeBuilder {
        BuildRuntimeBuilder::new()
    }

    /// Expand `request` over the project graph and enqueue the result.
    pub fn trigger(&self, request: BuildRequest) -> crate::Result<EnqueueOutcome> {
        if self.shared.queue.is_stopped() {
            return Err(crate::Error::ShutDown);
        }
        let batch = self.handler.prepare(request)?;
        Ok(self.shared.queue.enqueue(batch))
    }

    /// Cancel a queued request.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        self.shared.queue.cancel(request_id)
    }

    /// Cancel several queued requests without activating anything in between.
    ///
    /// Returns how many were cancelled.
    pub fn cancel_all(&self, request_ids: &[RequestId]) -> usize {
        let mut paused = self.shared.queue.pause();
        let cancelled = request_ids
            .iter()
            .filter(|request_id| paused.cancel(**request_id))
            .count();
        paused.resume();
        cancelled
    }

    /// Ask the running build of `request_id` to stop.
    ///
    /// Returns false if no build is running for it.
    pub fn terminate(&self, request_id: RequestId) -> bool {
        match self.shared.running().get(&request_id) {
            Some(token) => {
                token.store(true, Ordering::SeqCst);
                info!(request_id = %request_id, "Build termination requested");
                true
            }
            None => false,
        }
    }

    /// Subscribe to queue and build events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    /// The queue driven by this runtime.
    pub fn queue(&self) -> &Arc<BuildQueue> {
        &self.shared.queue
    }

    /// The registry recording request lifecycles.
    pub fn registry(&self) -> &Arc<InMemoryRequestRegistry> {
        &self.registry
    }

    /// The project graph requests are expanded against.
    pub fn projects(&self) -> &ProjectGraph {
        self.handler.projects()
    }

    /// Wait until nothing is queued or activated.
    ///
    /// Returns false if the queue is still busy after `timeout`.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let queue = &self.shared.queue;
        let idle = async {
            loop {
                let snapshot = queue.snapshot();
                if snapshot.queued.is_empty() && snapshot.activated.is_empty() {
                    break;
                }
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops the queue, cancels running builds and waits for the dispatcher
    /// to finish them.
    pub async fn shutdown(self) -> Result<()> {
        info!("BuildRuntime shutting down...");

        self.shared.queue.stop();

        // Signal dispatcher shutdown
        let _ = self.shutdown_tx.send(true);

        match self.dispatcher_handle.await {
            Ok(()) => {
                info!("BuildRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("BuildRuntime dispatcher task panicked: {}", e);
                Err(anyhow::anyhow!("dispatcher task panicked: {}", e))
            }
        }
    }

    /// Check if the dispatcher is still running.
    pub fn is_running(&self) -> bool {
        !self.dispatcher_handle.is_finished()
    }
}

/// Receive started builds and run each one in its own task.
async fn run_dispatcher(
    shared: Arc<Shared>,
    mut jobs: mpsc::UnboundedReceiver<BuildJob>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut builds = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Build dispatcher received shutdown signal");
                    break;
                }
            }

            job = jobs.recv() => {
                match job {
                    Some(job) => {
                        builds.spawn(run_build(shared.clone(), job));
                    }
                    None => {
                        // All controllers dropped
                        break;
                    }
                }
            }

            Some(result) = builds.join_next(), if !builds.is_empty() => {
                if let Err(e) = result {
                    error!("Build task panicked: {}", e);
                }
            }
        }
    }

    let cancelled = shared.cancel_running();
    if cancelled > 0 {
        info!(builds = cancelled, "Cancelling running builds");
    }
    while let Some(result) = builds.join_next().await {
        if let Err(e) = result {
            error!("Build task panicked: {}", e);
        }
    }
}

/// Run one build and report it back to the queue.
async fn run_build(shared: Arc<Shared>, mut job: BuildJob) {
    let request_id = job.request_id();
    let cancel_token: CancelToken = Arc::new(AtomicBool::new(false));
    shared.running().insert(request_id, cancel_token.clone());

    // Build the request as the queue holds it; assimilation may have swapped
    // its revision since the controller started.
    if let Some(request) = shared.queue.commencing(job.build_result_id) {
        job.request = request;
    }
    debug!(
        request_id = %request_id,
        owner = %job.owner(),
        build_number = job.build_number,
        "Build commenced"
    );

    let result = match fix_revision(&job).await {
        Ok(()) => shared.executor.execute(&job, cancel_token).await,
        Err(e) => Err(e),
    };

    shared.running().remove(&request_id);

    let succeeded = match result {
        Ok(outcome) => {
            info!(
                request_id = %request_id,
                owner = %job.owner(),
                build_number = job.build_number,
                succeeded = outcome.succeeded,
                duration_ms = outcome.duration_ms,
                "Build finished"
            );
            outcome.succeeded
        }
        Err(e) => {
            warn!(
                request_id = %request_id,
                owner = %job.owner(),
                build_number = job.build_number,
                error = %e,
                "Build failed"
            );
            false
        }
    };

    shared.events.publish(QueueEvent::BuildCompleted {
        request_id,
        owner: job.owner().clone(),
        build_number: job.build_number,
        succeeded,
    });
    shared.queue.complete(request_id);
}

/// Fix the job's revision off the async workers; SCM lookups may block.
async fn fix_revision(job: &BuildJob) -> std::result::Result<(), ExecutorError> {
    let revision = job.request.revision().clone();
    let fixed = tokio::task::spawn_blocking(move || revision.fix())
        .await
        .map_err(|e| ExecutorError::Other(format!("revision task failed: {}", e)))??;
    debug!(
        request_id = %job.request_id(),
        revision = %fixed,
        "Revision fixed"
    );
    Ok(())
}

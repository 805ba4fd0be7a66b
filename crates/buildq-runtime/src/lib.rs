// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Buildq Runtime - Build Dispatch and Completion Signalling
//!
//! Embeds a [`buildq_core::BuildQueue`] in a tokio application. Activated
//! requests are handed to a [`BuildExecutor`](executor::BuildExecutor), and
//! the queue is told when each build commences and completes.
//!
//! # Architecture
//!
//! ```text
//! trigger() ──► ExtendedBuildRequestHandler ──► BuildQueue
//!                                                   │ start()
//!                                                   ▼
//!                                   DispatchingController ──► mpsc ──► dispatcher
//!                                                                        │ spawn
//!                                                                        ▼
//!                        commencing() ◄── fix revision ◄── BuildExecutor::execute
//!                        complete()   ◄── BuildCompleted event
//! ```
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUILDQ_PROJECTS_FILE` | required | Project configuration JSON |
//! | `BUILDQ_TRIGGERS_FILE` | none | Build requests to trigger on startup |
//! | `BUILDQ_EVENT_CAPACITY` | `256` | Event channel capacity |
//! | `BUILDQ_SIMULATED_BUILD_MS` | `100` | Mock build duration |
//! | `BUILDQ_IDLE_TIMEOUT_SECS` | `60` | Time allowed for the queue to drain |

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Controllers dispatching started builds to the runtime.
pub mod controller;

/// Error types.
pub mod error;

/// Build executors.
pub mod executor;

/// Embeddable runtime.
pub mod runtime;

/// Trigger definitions loaded from JSON.
pub mod trigger;

pub use config::Config;
pub use controller::DispatchingControllerFactory;
pub use error::{Error, Result};
pub use executor::{BuildExecutor, BuildJob, BuildOutcome, ExecutorError, MockExecutor};
pub use runtime::{BuildRuntime, BuildRuntimeBuilder};
pub use trigger::{TriggerSpec, load_triggers};

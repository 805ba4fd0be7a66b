// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Buildq Core - Build Queue and Activation Engine
//!
//! This crate decides when build requests run. It accepts requests, merges
//! redundant ones, orders requests of dependent projects and hands each
//! request to a build controller as soon as every condition gating it holds.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │              Triggers (SCM pollers, manual, dependencies)             │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                   │ BuildRequest
//!                                   ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                  ExtendedBuildRequestHandler                          │
//! │   meta-build id, upstream rebuild set, downstream trigger set,        │
//! │   one QueuedRequest per project with predicates wired between them    │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                   │ Vec<QueuedRequest>
//!                                   ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           BuildQueue                                  │
//! │     assimilate │ queued (newest first) │ activated (newest first)     │
//! └──────────────────────────────────────────────────────────────────────┘
//!        │ start()                  │ lifecycle               │ events
//!        ▼                          ▼                         ▼
//! ┌────────────────┐   ┌──────────────────────────┐   ┌──────────────────┐
//! │ BuildController│   │  BuildRequestRegistry    │   │  EventPublisher  │
//! └────────────────┘   └──────────────────────────┘   └──────────────────┘
//! ```
//!
//! # Request lifecycle
//!
//! | Transition | Trigger | Registry call |
//! |------------|---------|---------------|
//! | queued | `enqueue` without assimilation | `request_queued` |
//! | assimilated | `enqueue` with a pending replaceable twin | `request_assimilated` |
//! | activated | all predicates hold, controller started | `request_activated` |
//! | rejected | controller refused to start | `request_rejected` |
//! | cancelled | `cancel` while still queued | `request_cancelled` |
//! | gone | `complete` after the build finished | none |
//!
//! # Predicates
//!
//! | Predicate | Holds when |
//! |-----------|------------|
//! | `ActiveBuildsPerOwner` | fewer than the owner's limit are activated |
//! | `HeadOfOwnerQueue` | the request is its owner's oldest queued request |
//! | `HeadOfOwnerCanJump` | the request is its owner's oldest queue-jumping request |
//! | `DependencyComplete` | the named owner has left the meta-build |
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUILDQ_DEFAULT_CONCURRENT_BUILDS` | `1` | Concurrency of projects without their own limit |
//! | `BUILDQ_REGISTRY_CAPACITY` | `1000` | Records kept by the in-memory registry |

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Build controller contract and mock implementation.
pub mod controller;

/// Error types with stable error codes.
pub mod error;

/// Queue lifecycle events and publishers.
pub mod events;

/// Build request expansion over the project graph.
pub mod handler;

/// Queued and activated request wrappers.
pub mod holder;

/// Activation predicates.
pub mod predicate;

/// Project configuration and dependency trees.
pub mod project;

/// The build queue.
pub mod queue;

/// Request lifecycle registry.
pub mod registry;

/// Build request value types.
pub mod request;

/// Lazily fixed revisions and SCM access.
pub mod revision;

pub use config::Config;
pub use controller::{BuildController, BuildControllerFactory, MockControllerFactory};
pub use error::{Error, Result};
pub use events::{BroadcastPublisher, EventPublisher, NoopPublisher, QueueEvent};
pub use handler::ExtendedBuildRequestHandler;
pub use holder::{ActivatedRequest, QueuedRequest, RequestHolder};
pub use predicate::{QueuePredicate, QueueView};
pub use project::{ProjectConfig, ProjectGraph};
pub use queue::{BuildQueue, EnqueueOutcome, PausedQueue, QueueSnapshot};
pub use registry::{BuildRequestRegistry, InMemoryRequestRegistry, RequestStatus};
pub use request::{BuildReason, BuildRequest, MetaBuildId, Owner, RequestId, TriggerOptions};
pub use revision::{BuildRevision, InMemoryScm, Revision, ScmManager};

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Controller trait definitions.

use std::sync::Arc;

use crate::request::BuildRequest;

/// Reason recorded when a controller refuses to start a build.
pub const REJECTED_WITH_FAILURE: &str = "rejected.with.failure";

/// Controls the build of one activated request.
///
/// `start` is called while the queue lock is held. It must not block on
/// network or process I/O: it registers that the build should start and
/// returns a provisional build number.
pub trait BuildController: Send + Sync {
    /// Attempt to begin the build.
    ///
    /// Returns the newly assigned build number, or `None` if the build was
    /// rejected (for example, no eligible agent).
    fn start(&self) -> Option<u64>;

    /// Identifier of the running build, used to correlate `commencing`
    /// notifications. Zero until the build has started.
    fn build_result_id(&self) -> u64;
}

/// Creates controllers for activated requests.
pub trait BuildControllerFactory: Send + Sync {
    /// Construct a controller for `request`. Must have no side effects.
    fn create(&self, request: &BuildRequest) -> Arc<dyn BuildController>;
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor module - build execution backends.

pub mod mock;
mod traits;

pub use mock::MockExecutor;
pub use traits::*;

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build controller contract.
//!
//! The queue hands every activated request to a controller obtained from a
//! [`BuildControllerFactory`]. Controllers only register that a build should
//! start; recipe execution happens elsewhere.

pub mod mock;
mod traits;

pub use mock::{MockController, MockControllerFactory, StartRecord};
pub use traits::*;

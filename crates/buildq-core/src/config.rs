// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

/// Default number of concurrent builds per project.
pub const DEFAULT_CONCURRENT_BUILDS: i32 = 1;

/// Default number of request records kept by the in-memory registry.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 1000;

/// Build queue configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Concurrent builds allowed for a project that does not configure its own limit.
    /// Zero or negative means unlimited.
    pub default_concurrent_builds: i32,
    /// Maximum number of request records kept by the in-memory registry.
    pub registry_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_concurrent_builds: DEFAULT_CONCURRENT_BUILDS,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `BUILDQ_DEFAULT_CONCURRENT_BUILDS`: Per-project concurrency when unset (default: 1)
    /// - `BUILDQ_REGISTRY_CAPACITY`: Registry record capacity (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let default_concurrent_builds: i32 = std::env::var("BUILDQ_DEFAULT_CONCURRENT_BUILDS")
            .unwrap_or_else(|_| DEFAULT_CONCURRENT_BUILDS.to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("BUILDQ_DEFAULT_CONCURRENT_BUILDS", "must be an integer")
            })?;

        let registry_capacity: usize = std::env::var("BUILDQ_REGISTRY_CAPACITY")
            .unwrap_or_else(|_| DEFAULT_REGISTRY_CAPACITY.to_string())
            .parse()
            .ok()
            .filter(|capacity| *capacity > 0)
            .ok_or(ConfigError::Invalid(
                "BUILDQ_REGISTRY_CAPACITY",
                "must be a positive integer",
            ))?;

        Ok(Self {
            default_concurrent_builds,
            registry_capacity,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

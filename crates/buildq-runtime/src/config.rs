// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for buildq-runtime.

use std::path::PathBuf;
use std::time::Duration;

pub use buildq_core::config::ConfigError;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default duration of a simulated build, in milliseconds.
pub const DEFAULT_SIMULATED_BUILD_MS: u64 = 100;

/// Default time to wait for the queue to drain, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Queue engine settings.
    pub core: buildq_core::Config,
    /// JSON file holding the project configurations.
    pub projects_file: PathBuf,
    /// JSON file holding the build requests to trigger, if any.
    pub triggers_file: Option<PathBuf>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Duration of a simulated build.
    pub simulated_build_ms: u64,
    /// How long to wait for all builds to finish.
    pub idle_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `BUILDQ_PROJECTS_FILE`: Path of the project configuration JSON
    ///
    /// Optional (with defaults):
    /// - `BUILDQ_TRIGGERS_FILE`: Path of the trigger list JSON
    /// - `BUILDQ_EVENT_CAPACITY`: Event channel capacity (default: 256)
    /// - `BUILDQ_SIMULATED_BUILD_MS`: Simulated build time (default: 100)
    /// - `BUILDQ_IDLE_TIMEOUT_SECS`: Drain timeout (default: 60)
    ///
    /// Queue engine variables are read by [`buildq_core::Config::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let core = buildq_core::Config::from_env()?;

        let projects_file = std::env::var("BUILDQ_PROJECTS_FILE")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::Missing("BUILDQ_PROJECTS_FILE"))?;

        let triggers_file = std::env::var("BUILDQ_TRIGGERS_FILE")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let event_capacity: usize = std::env::var("BUILDQ_EVENT_CAPACITY")
            .unwrap_or_else(|_| DEFAULT_EVENT_CAPACITY.to_string())
            .parse()
            .ok()
            .filter(|capacity| *capacity > 0)
            .ok_or(ConfigError::Invalid(
                "BUILDQ_EVENT_CAPACITY",
                "must be a positive integer",
            ))?;

        let simulated_build_ms: u64 = std::env::var("BUILDQ_SIMULATED_BUILD_MS")
            .unwrap_or_else(|_| DEFAULT_SIMULATED_BUILD_MS.to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("BUILDQ_SIMULATED_BUILD_MS", "must be an integer"))?;

        let idle_timeout_secs: u64 = std::env::var("BUILDQ_IDLE_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_IDLE_TIMEOUT_SECS.to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("BUILDQ_IDLE_TIMEOUT_SECS", "must be an integer"))?;

        Ok(Self {
            core,
            projects_file,
            triggers_file,
            event_capacity,
            simulated_build_ms,
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }

        fn clear_optional(&mut self) {
            for key in [
                "BUILDQ_DEFAULT_CONCURRENT_BUILDS",
                "BUILDQ_REGISTRY_CAPACITY",
                "BUILDQ_TRIGGERS_FILE",
                "BUILDQ_EVENT_CAPACITY",
                "BUILDQ_SIMULATED_BUILD_MS",
                "BUILDQ_IDLE_TIMEOUT_SECS",
            ] {
                self.remove(key);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_requires_projects_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_optional();
        guard.remove("BUILDQ_PROJECTS_FILE");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BUILDQ_PROJECTS_FILE")));
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_optional();
        guard.set("BUILDQ_PROJECTS_FILE", "/tmp/projects.json");

        let config = Config::from_env().unwrap();

        assert_eq!(config.projects_file, PathBuf::from("/tmp/projects.json"));
        assert!(config.triggers_file.is_none());
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.simulated_build_ms, 100);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.core.default_concurrent_builds, 1);
    }

    #[test]
    fn test_config_from_env_with_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_optional();
        guard.set("BUILDQ_PROJECTS_FILE", "projects.json");
        guard.set("BUILDQ_TRIGGERS_FILE", "triggers.json");
        guard.set("BUILDQ_EVENT_CAPACITY", "16");
        guard.set("BUILDQ_SIMULATED_BUILD_MS", "5");
        guard.set("BUILDQ_IDLE_TIMEOUT_SECS", "3");
        guard.set("BUILDQ_DEFAULT_CONCURRENT_BUILDS", "4");

        let config = Config::from_env().unwrap();

        assert_eq!(config.triggers_file, Some(PathBuf::from("triggers.json")));
        assert_eq!(config.event_capacity, 16);
        assert_eq!(config.simulated_build_ms, 5);
        assert_eq!(config.idle_timeout, Duration::from_secs(3));
        assert_eq!(config.core.default_concurrent_builds, 4);
    }

    #[test]
    fn test_config_rejects_zero_event_capacity() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_optional();
        guard.set("BUILDQ_PROJECTS_FILE", "projects.json");
        guard.set("BUILDQ_EVENT_CAPACITY", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("BUILDQ_EVENT_CAPACITY", _)));
    }
}

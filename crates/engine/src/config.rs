// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tunable knobs for every tier, with the defaults named in the system
//! design. Loaded from a TOML file and overridable by CLI flags, the same
//! layering the daemon uses for its own process-level settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Poll interval for the provider's `List()`.
    pub fleet_sync_interval_secs: u64,
    /// Retry window for a boot command before the controller resends it.
    pub start_signal_timeout_secs: u64,
    /// Silence window before a running instance is declared dead.
    pub heartbeat_timeout_secs: u64,
    /// FC control loop tick period.
    pub server_sleep_secs: u64,
    /// Dispatcher's upward heartbeat period.
    pub dispatcher_heartbeat_interval_secs: u64,
    /// Worker's upward heartbeat period.
    pub worker_heartbeat_interval_secs: u64,
    /// Log upload period.
    pub logging_interval_secs: u64,
    /// Retry delay used when `debug` is set and an instance fails to
    /// configure; distinct from `start_signal_timeout_secs`, which governs
    /// the non-debug retry cadence.
    pub debug_init_retry_secs: u64,
    /// Autoscaler sliding window length, in dispatcher heartbeats.
    pub window_size: usize,
    pub min_jobs_per_worker: f64,
    pub max_jobs_per_worker: f64,
    pub max_workers: usize,
    /// FC preserves the dispatcher VM on shutdown for developer convenience.
    pub debug: bool,
    /// Boot script checks out this branch before running, if set.
    pub git_pull_branch: Option<String>,
    pub fc_port: u16,
    pub dispatcher_port: u16,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            fleet_sync_interval_secs: 60,
            start_signal_timeout_secs: 30,
            heartbeat_timeout_secs: 30,
            server_sleep_secs: 1,
            dispatcher_heartbeat_interval_secs: 2,
            worker_heartbeat_interval_secs: 3,
            logging_interval_secs: 60,
            debug_init_retry_secs: 5,
            window_size: 2,
            min_jobs_per_worker: 1.0,
            max_jobs_per_worker: 5.0,
            max_workers: 10,
            debug: false,
            git_pull_branch: None,
            fc_port: 8080,
            dispatcher_port: 8081,
        }
    }
}

impl FleetConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from an optional TOML file, falling back to defaults for any
    /// field the file omits (and for the whole struct if no path is given).
    /// Callers apply CLI-sourced overrides (`debug`, `git_pull_branch`) on
    /// top of the result.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
                Self::from_toml_str(&text)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn fleet_sync_interval(&self) -> Duration {
        secs(self.fleet_sync_interval_secs)
    }

    pub fn start_signal_timeout(&self) -> Duration {
        secs(self.start_signal_timeout_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        secs(self.heartbeat_timeout_secs)
    }

    pub fn server_sleep(&self) -> Duration {
        secs(self.server_sleep_secs)
    }

    pub fn dispatcher_heartbeat_interval(&self) -> Duration {
        secs(self.dispatcher_heartbeat_interval_secs)
    }

    pub fn worker_heartbeat_interval(&self) -> Duration {
        secs(self.worker_heartbeat_interval_secs)
    }

    pub fn logging_interval(&self) -> Duration {
        secs(self.logging_interval_secs)
    }

    pub fn debug_init_retry(&self) -> Duration {
        secs(self.debug_init_retry_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read config file: {0}")]
    Read(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.heartbeat_timeout_secs, 30);
        assert_eq!(cfg.start_signal_timeout_secs, 30);
        assert_eq!(cfg.window_size, 2);
        assert_eq!(cfg.min_jobs_per_worker, 1.0);
        assert_eq!(cfg.max_jobs_per_worker, 5.0);
    }

    #[test]
    fn partial_toml_overrides_fall_back_to_defaults() {
        let cfg = FleetConfig::from_toml_str("debug = true\nmax_workers = 3\n").unwrap();
        assert!(cfg.debug);
        assert_eq!(cfg.max_workers, 3);
        assert_eq!(cfg.heartbeat_timeout_secs, 30);
    }

    #[test]
    fn load_with_no_path_returns_defaults() {
        let cfg = FleetConfig::load(None).unwrap();
        assert_eq!(cfg.debug_init_retry_secs, 5);
    }

    #[test]
    fn load_reads_and_layers_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cf.toml");
        std::fs::write(&path, "max_workers = 7\n").unwrap();
        let cfg = FleetConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.max_workers, 7);
        assert_eq!(cfg.window_size, 2);
    }
}

//! Harness configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for the sandbox, protocol client, orchestrator and scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory holding cloned target sources (`<repos_dir>/<name>`).
    pub repos_dir: PathBuf,
    /// Directory of the filesystem catalog.
    pub catalog_dir: PathBuf,
    /// Container engine CLI (`docker`, `podman`).
    pub engine_binary: String,
    /// Name prefix of every instance the harness starts.
    pub instance_prefix: String,
    /// Working directory of the target inside its instance.
    pub workdir: String,
    pub request_timeout_ms: u64,
    pub disconnect_grace_ms: u64,
    pub readiness_poll_interval_ms: u64,
    pub startup_timeout_secs: u64,
    pub call_pause_ms: u64,
    pub max_cases_per_capability: usize,
    pub testing_enabled: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            repos_dir: PathBuf::from("./repos"),
            catalog_dir: PathBuf::from("./.mcp-harness/catalog"),
            engine_binary: "docker".to_string(),
            instance_prefix: "mcp-test-".to_string(),
            workdir: "/app".to_string(),
            request_timeout_ms: 30_000,
            disconnect_grace_ms: 5_000,
            readiness_poll_interval_ms: 1_000,
            startup_timeout_secs: 60,
            call_pause_ms: 500,
            max_cases_per_capability: 8,
            testing_enabled: true,
        }
    }
}

impl HarnessConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be > 0".into()));
        }
        if self.readiness_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "readiness_poll_interval_ms must be > 0".into(),
            ));
        }
        if self.startup_timeout_secs == 0 {
            return Err(ConfigError::Invalid("startup_timeout_secs must be > 0".into()));
        }
        if self.max_cases_per_capability == 0 {
            return Err(ConfigError::Invalid(
                "max_cases_per_capability must be > 0".into(),
            ));
        }
        if self.engine_binary.trim().is_empty() {
            return Err(ConfigError::Invalid("engine_binary must not be empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }

    pub fn call_pause(&self) -> Duration {
        Duration::from_millis(self.call_pause_ms)
    }
}

//! Catalog-side view of a target and per-run overrides.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::report::TestReport;

/// Catalog environment values come either bare or wrapped as `{value: ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Plain(String),
    Wrapped { value: String },
}

impl EnvValue {
    pub fn as_str(&self) -> &str {
        match self {
            EnvValue::Plain(v) => v,
            EnvValue::Wrapped { value } => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Running => write!(f, "running"),
            TestStatus::Completed => write!(f, "completed"),
            TestStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Metadata the catalog keeps for one target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetMetadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    /// Pre-built image to pull instead of building from source.
    #[serde(default)]
    pub image_reference: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
    /// Purely external reference: nothing local to build or run.
    #[serde(default)]
    pub is_external_config: bool,
    #[serde(default)]
    pub test_status: Option<TestStatus>,
    #[serde(default)]
    pub last_report: Option<TestReport>,
}

impl TargetMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.command = Some(command.into());
        self.args = args;
        self
    }

    /// Environment flattened to plain strings.
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().to_string()))
            .collect()
    }
}

/// Per-run launch overrides supplied by the caller of `trigger`/`test_target`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOverrides {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
}

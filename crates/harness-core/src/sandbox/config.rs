//! Launch configuration for one sandbox instance.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How to obtain, start and talk to one target. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Local checkout of the target; build context for images.
    pub source_path: PathBuf,
    /// Pre-built image, or the tag to give a built one.
    pub image_reference: Option<String>,
    /// Command that starts the target's stdio server.
    pub entry_command: Option<String>,
    #[serde(default)]
    pub entry_args: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub startup_timeout_secs: u64,
}

impl SandboxConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            image_reference: None,
            entry_command: None,
            entry_args: Vec::new(),
            environment: BTreeMap::new(),
            startup_timeout_secs: 60,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image_reference = Some(image.into());
        self
    }

    pub fn with_entry(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.entry_command = Some(command.into());
        self.entry_args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_startup_timeout(mut self, secs: u64) -> Self {
        self.startup_timeout_secs = secs;
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Entry command followed by its arguments, if a command is set.
    pub fn entry_argv(&self) -> Option<Vec<String>> {
        self.entry_command.as_ref().map(|cmd| {
            let mut argv = Vec::with_capacity(self.entry_args.len() + 1);
            argv.push(cmd.clone());
            argv.extend(self.entry_args.iter().cloned());
            argv
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_argv() {
        let cfg = SandboxConfig::new("/src").with_entry("node", vec!["index.js".into()]);
        assert_eq!(cfg.entry_argv().unwrap(), vec!["node", "index.js"]);
        assert!(SandboxConfig::new("/src").entry_argv().is_none());
    }

    #[test]
    fn test_builders() {
        let cfg = SandboxConfig::new("/src")
            .with_image("ghcr.io/acme/server:1")
            .with_env("TOKEN", "x")
            .with_startup_timeout(5);
        assert_eq!(cfg.image_reference.as_deref(), Some("ghcr.io/acme/server:1"));
        assert_eq!(cfg.environment["TOKEN"], "x");
        assert_eq!(cfg.startup_timeout(), Duration::from_secs(5));
    }
}

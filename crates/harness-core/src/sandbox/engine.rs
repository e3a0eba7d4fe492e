//! Container engine abstraction.
//!
//! The lifecycle manager speaks to the engine only through
//! [`ContainerEngine`]; [`super::docker::DockerCli`] shells out to a
//! Docker-compatible CLI and [`crate::fakes::FakeEngine`] scripts it in tests.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::SandboxResult;
use crate::protocol::transport::StdioChannel;

/// Captured result of a one-shot engine command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl std::fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "STDOUT:\n{}\nSTDERR:\n{}", self.stdout, self.stderr)
    }
}

/// Everything needed to start one detached instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub environment: BTreeMap<String, String>,
    /// Overrides the image's default command when set.
    pub command: Option<Vec<String>>,
}

/// Liveness of an instance as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Created or restarting; not yet running.
    Starting,
    Running,
    Exited { exit_code: Option<i32> },
}

/// How the protocol process is attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdioCommand {
    /// Spawn `argv` inside the instance from `workdir`.
    Exec { argv: Vec<String>, workdir: String },
    /// Attach to the instance's primary process.
    Attach,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Build `context` with the recipe at `recipe`, tagging it `tag`.
    async fn build(&self, context: &Path, recipe: &Path, tag: &str) -> SandboxResult<()>;

    async fn pull(&self, image: &str) -> SandboxResult<()>;

    /// Start a detached instance with stdin kept open. Returns its id.
    async fn run(&self, spec: &RunSpec) -> SandboxResult<String>;

    async fn status(&self, instance_id: &str) -> SandboxResult<InstanceStatus>;

    async fn logs(&self, instance_id: &str) -> SandboxResult<CapturedOutput>;

    /// Run a one-shot command; non-zero exit is not an error.
    async fn exec(&self, instance_id: &str, argv: &[String]) -> SandboxResult<CapturedOutput>;

    /// Force-stop and remove an instance.
    async fn remove(&self, instance_id: &str) -> SandboxResult<()>;

    /// Ids of all instances (running or not) whose name starts with `prefix`.
    async fn list(&self, name_prefix: &str) -> SandboxResult<Vec<String>>;

    async fn open_stdio(
        &self,
        instance_id: &str,
        command: &StdioCommand,
    ) -> SandboxResult<StdioChannel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_output_display() {
        let out = CapturedOutput {
            exit_code: Some(1),
            stdout: "building".into(),
            stderr: "failed".into(),
        };
        assert!(!out.success());
        assert_eq!(out.to_string(), "STDOUT:\nbuilding\nSTDERR:\nfailed");
    }
}

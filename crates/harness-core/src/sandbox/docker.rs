//! [`ContainerEngine`] backed by a Docker-compatible command-line client.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::engine::{CapturedOutput, ContainerEngine, InstanceStatus, RunSpec, StdioCommand};
use super::error::{SandboxError, SandboxResult};
use crate::protocol::transport::StdioChannel;

/// Label put on every instance the harness starts.
pub const HARNESS_LABEL: &str = "mcp-harness=1";

/// Shells out to `docker` (or a compatible binary such as `podman`).
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check that the engine answers `version`.
    pub async fn check_available(&self) -> SandboxResult<()> {
        let out = self.output(&["version".to_string()]).await?;
        if out.success() {
            info!(binary = %self.binary, "container engine reachable");
            Ok(())
        } else {
            Err(SandboxError::Engine(format!(
                "{} not available:\n{}",
                self.binary, out
            )))
        }
    }

    async fn output(&self, args: &[String]) -> SandboxResult<CapturedOutput> {
        debug!(binary = %self.binary, ?args, "engine command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(CapturedOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn run_args(spec: &RunSpec) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--name".into(),
            spec.name.clone(),
            "--label".into(),
            HARNESS_LABEL.into(),
            "-i".into(),
            "--detach".into(),
        ];
        for (key, value) in &spec.environment {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.clone());
        if let Some(command) = &spec.command {
            args.extend(command.iter().cloned());
        }
        args
    }

    /// Harness-labelled instances whose name starts with `name_prefix`.
    ///
    /// The engine's name filter is an unanchored regex over names that may
    /// carry a leading `/`.
    fn list_args(name_prefix: &str) -> Vec<String> {
        let mut anchored = String::from("name=^/?");
        for c in name_prefix.chars() {
            if "\\.+*?()|[]{}^$".contains(c) {
                anchored.push('\\');
            }
            anchored.push(c);
        }
        vec![
            "ps".into(),
            "-a".into(),
            "--filter".into(),
            format!("label={HARNESS_LABEL}"),
            "--filter".into(),
            anchored,
            "--format".into(),
            "{{.ID}}".into(),
        ]
    }

    fn stdio_args(instance_id: &str, command: &StdioCommand) -> Vec<String> {
        match command {
            StdioCommand::Exec { argv, workdir } => {
                let mut args: Vec<String> = vec![
                    "exec".into(),
                    "-i".into(),
                    instance_id.to_string(),
                    "sh".into(),
                    "-c".into(),
                    format!("cd {workdir} && exec \"$@\""),
                    "--".into(),
                ];
                args.extend(argv.iter().cloned());
                args
            }
            StdioCommand::Attach => vec![
                "attach".into(),
                "--sig-proxy=false".into(),
                instance_id.to_string(),
            ],
        }
    }

    fn parse_status(line: &str) -> Option<InstanceStatus> {
        let mut parts = line.split_whitespace();
        let state = parts.next()?;
        let exit_code = parts.next().and_then(|c| c.parse().ok());
        Some(match state {
            "running" => InstanceStatus::Running,
            "created" | "restarting" => InstanceStatus::Starting,
            // paused, removing, exited, dead
            _ => InstanceStatus::Exited { exit_code },
        })
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn build(&self, context: &Path, recipe: &Path, tag: &str) -> SandboxResult<()> {
        info!(image = %tag, context = %context.display(), "building image");
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            "-f".to_string(),
            recipe.to_string_lossy().to_string(),
            context.to_string_lossy().to_string(),
        ];
        let out = self.output(&args).await?;
        if !out.success() {
            return Err(SandboxError::Build {
                image: tag.to_string(),
                output: out.to_string(),
            });
        }
        Ok(())
    }

    async fn pull(&self, image: &str) -> SandboxResult<()> {
        info!(image = %image, "pulling image");
        let out = self.output(&["pull".to_string(), image.to_string()]).await?;
        if !out.success() {
            return Err(SandboxError::Pull {
                image: image.to_string(),
                output: out.to_string(),
            });
        }
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> SandboxResult<String> {
        let out = self.output(&Self::run_args(spec)).await?;
        let id = out.stdout.trim().to_string();
        if !out.success() || id.is_empty() {
            return Err(SandboxError::Start {
                image: spec.image.clone(),
                output: out.to_string(),
            });
        }
        Ok(id)
    }

    async fn status(&self, instance_id: &str) -> SandboxResult<InstanceStatus> {
        let args = vec![
            "inspect".to_string(),
            "--format={{.State.Status}} {{.State.ExitCode}}".to_string(),
            instance_id.to_string(),
        ];
        let out = self.output(&args).await?;
        if !out.success() {
            return Err(SandboxError::Engine(format!(
                "inspect {instance_id} failed: {}",
                out.stderr.trim()
            )));
        }
        Self::parse_status(out.stdout.trim()).ok_or_else(|| {
            SandboxError::Engine(format!("unrecognised inspect output: {:?}", out.stdout))
        })
    }

    async fn logs(&self, instance_id: &str) -> SandboxResult<CapturedOutput> {
        self.output(&["logs".to_string(), instance_id.to_string()])
            .await
    }

    async fn exec(&self, instance_id: &str, argv: &[String]) -> SandboxResult<CapturedOutput> {
        let mut args = vec!["exec".to_string(), "-i".to_string(), instance_id.to_string()];
        args.extend(argv.iter().cloned());
        self.output(&args).await
    }

    async fn remove(&self, instance_id: &str) -> SandboxResult<()> {
        let out = self
            .output(&["rm".to_string(), "-f".to_string(), instance_id.to_string()])
            .await?;
        if !out.success() {
            return Err(SandboxError::Engine(format!(
                "rm {instance_id} failed: {}",
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn list(&self, name_prefix: &str) -> SandboxResult<Vec<String>> {
        let out = self.output(&Self::list_args(name_prefix)).await?;
        if !out.success() {
            return Err(SandboxError::Engine(format!("ps failed: {}", out.stderr.trim())));
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn open_stdio(
        &self,
        instance_id: &str,
        command: &StdioCommand,
    ) -> SandboxResult<StdioChannel> {
        let mut child = Command::new(&self.binary)
            .args(Self::stdio_args(instance_id, command))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Engine("protocol process has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Engine("protocol process has no stdout".into()))?;

        // Drain stderr so a chatty server never blocks on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let instance = instance_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(instance = %instance, stderr = %line, "target stderr");
                }
            });
        }

        Ok(StdioChannel::new(stdout, stdin).with_process(child))
    }
}

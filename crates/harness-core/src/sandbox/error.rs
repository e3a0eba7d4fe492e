//! Error types for the sandbox layer.

use crate::domain::TerminalErrorKind;

/// Errors produced while preparing, starting or probing a sandbox instance.
///
/// Build, pull and start failures embed the engine's captured output so the
/// report shows why the engine refused.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("image build failed for {image}:\n{output}")]
    Build { image: String, output: String },

    #[error("image pull failed for {image}:\n{output}")]
    Pull { image: String, output: String },

    #[error("instance start failed from {image}:\n{output}")]
    Start { image: String, output: String },

    #[error("instance {instance} exited before becoming ready:\n{logs}")]
    PrematureExit { instance: String, logs: String },

    #[error("instance {instance} not ready after {timeout_secs}s:\n{logs}")]
    ReadinessTimeout {
        instance: String,
        timeout_secs: u64,
        logs: String,
    },

    #[error("source path {0} is not a directory")]
    SourceMissing(std::path::PathBuf),

    #[error("engine command failed: {0}")]
    Engine(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Instance logs or engine output captured alongside the failure.
    pub fn logs(&self) -> Option<&str> {
        match self {
            SandboxError::Build { output, .. }
            | SandboxError::Pull { output, .. }
            | SandboxError::Start { output, .. } => Some(output),
            SandboxError::PrematureExit { logs, .. }
            | SandboxError::ReadinessTimeout { logs, .. } => Some(logs),
            _ => None,
        }
    }

    /// Stage this failure ends a run at.
    pub fn terminal_kind(&self) -> TerminalErrorKind {
        match self {
            SandboxError::Build { .. } => TerminalErrorKind::Build,
            SandboxError::Pull { .. } => TerminalErrorKind::Pull,
            SandboxError::Start { .. } => TerminalErrorKind::Start,
            SandboxError::PrematureExit { .. } => TerminalErrorKind::PrematureExit,
            SandboxError::ReadinessTimeout { .. } => TerminalErrorKind::ReadinessTimeout,
            SandboxError::SourceMissing(_) => TerminalErrorKind::SourceUnresolved,
            SandboxError::Engine(_) | SandboxError::Io(_) => TerminalErrorKind::Internal,
        }
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

//! Sandbox: isolated, disposable instances running one target each.
//!
//! Images are built from the target's own recipe, pulled, or built from a
//! recipe synthesised from marker files. Instances are started detached with
//! stdin kept open, probed for liveness, and always removed afterwards.
//!
//! # Modules
//!
//! - [`config`]: `SandboxConfig` (source, image, entry command, env)
//! - [`recipe`]: marker-file runtime detection and recipe synthesis
//! - [`engine`]: `ContainerEngine` trait and its value types
//! - [`docker`]: `DockerCli`, the engine backed by a Docker-compatible CLI
//! - [`manager`]: `SandboxManager` lifecycle operations
//! - [`error`]: `SandboxError` / `SandboxResult`

pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod manager;
pub mod recipe;

pub use config::SandboxConfig;
pub use docker::DockerCli;
pub use engine::{CapturedOutput, ContainerEngine, InstanceStatus, RunSpec, StdioCommand};
pub use error::{SandboxError, SandboxResult};
pub use manager::{InstanceState, SandboxInstance, SandboxManager};

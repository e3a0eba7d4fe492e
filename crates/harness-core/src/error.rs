//! Top-level harness error type.

use crate::config::ConfigError;
use crate::external::{AssessmentError, CatalogError, GenerationError};
use crate::protocol::ProtocolError;
use crate::sandbox::SandboxError;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("assessment error: {0}")]
    Assessment(#[from] AssessmentError),

    #[error("a test run for {0} is already in progress")]
    AlreadyRunning(String),

    #[error("testing is disabled")]
    TestingDisabled,
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

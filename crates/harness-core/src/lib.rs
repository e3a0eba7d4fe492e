//! MCP Harness Core Library
//!
//! Runs MCP servers in disposable sandboxes, talks to them over stdio
//! JSON-RPC, exercises every tool they expose and scores the responses.
//! [`Scheduler`] is the entry point for callers; it keeps at most one run
//! per target in flight.

pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod external;
pub mod fakes;
pub mod generation;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod sandbox;
pub mod scheduler;
pub mod scoring;
pub mod session;
pub mod telemetry;

pub use domain::{
    CallResult, Capability, CapabilitySummary, DimensionScores, EnvValue, ErrorCode,
    InvocationOutcome, QualityAssessment, QualityMetrics, RpcError, RunOverrides, TargetMetadata,
    TerminalError, TerminalErrorKind, TestCase, TestCategory, TestReport, TestResult, TestStatus,
    TransportFailure, TransportFailureKind,
};

pub use error::{HarnessError, Result};

pub use config::{ConfigError, HarnessConfig};

pub use external::{
    AssessmentError, AssessmentInput, CatalogError, CatalogResult, CatalogStore, GenerationError,
    QualityAssessor, TestCaseGenerator,
};

pub use catalog::FsCatalog;
pub use generation::RuleBasedGenerator;
pub use scoring::HeuristicAssessor;

pub use sandbox::{
    ContainerEngine, DockerCli, SandboxConfig, SandboxError, SandboxInstance, SandboxManager,
};

pub use protocol::{ClientOptions, ProtocolClient, ProtocolError};

pub use session::{EngineConnector, TestSession};

pub use orchestrator::Orchestrator;
pub use registry::{RunGuard, RunRegistry};
pub use scheduler::{Scheduler, SchedulerStatus, TriggerOutcome};

pub use metrics::METRICS;
pub use telemetry::init_tracing;

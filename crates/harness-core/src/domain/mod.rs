//! Domain model shared by every harness component.

pub mod assessment;
pub mod capability;
pub mod outcome;
pub mod report;
pub mod target;
pub mod test_case;

pub use assessment::{DimensionScores, QualityAssessment, NEUTRAL_SCORE};
pub use capability::Capability;
pub use outcome::{
    CallResult, ErrorCode, InvocationOutcome, RpcError, Transcript, TransportFailure,
    TransportFailureKind,
};
pub use report::{
    CapabilitySummary, QualityMetrics, TerminalError, TerminalErrorKind, TestReport, TestResult,
};
pub use target::{EnvValue, RunOverrides, TargetMetadata, TestStatus};
pub use test_case::{Difficulty, TestCase, TestCategory};

//! Interfaces of the collaborators the harness consumes.
//!
//! - `CatalogStore`: key-value store of target metadata and reports
//! - `TestCaseGenerator`: produces test cases for one capability
//! - `QualityAssessor`: scores one invocation outcome
//!
//! All traits are async and backend-agnostic. Deterministic implementations
//! live in [`crate::generation`], [`crate::scoring`] and [`crate::catalog`];
//! in-memory fakes in [`crate::fakes`].

use async_trait::async_trait;

use crate::domain::{
    Capability, InvocationOutcome, QualityAssessment, TargetMetadata, TestCase, TestReport,
    TestStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("target not found: {0}")]
    NotFound(String),

    #[error("invalid target name: {0:?}")]
    InvalidName(String),

    #[error("catalog io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

// ---------------------------------------------------------------------------
// CatalogStore
// ---------------------------------------------------------------------------

/// Persistent catalog keyed by target name.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_target(&self, name: &str) -> CatalogResult<Option<TargetMetadata>>;

    /// Insert or replace a target's metadata.
    async fn put_target(&self, metadata: TargetMetadata) -> CatalogResult<()>;

    async fn list_targets(&self) -> CatalogResult<Vec<TargetMetadata>>;

    /// Store `report` as the target's last report and derive its status
    /// from it. Fails with `NotFound` for unknown targets.
    async fn save_test_report(&self, name: &str, report: &TestReport) -> CatalogResult<()>;

    async fn set_test_status(&self, name: &str, status: TestStatus) -> CatalogResult<()>;
}

/// Status a saved report leaves its target in.
pub fn status_for(report: &TestReport) -> TestStatus {
    if report.error.is_some() {
        TestStatus::Failed
    } else {
        TestStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// TestCaseGenerator
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("generator produced invalid cases: {0}")]
    Invalid(String),
}

/// Produces up to `max_cases` cases for one capability. An empty result is
/// legitimate; the orchestrator then synthesises a minimal case.
#[async_trait]
pub trait TestCaseGenerator: Send + Sync {
    async fn generate(
        &self,
        capability: &Capability,
        max_cases: usize,
    ) -> Result<Vec<TestCase>, GenerationError>;
}

// ---------------------------------------------------------------------------
// QualityAssessor
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AssessmentError {
    #[error("assessor unavailable: {0}")]
    Unavailable(String),

    #[error("assessor returned malformed output: {0}")]
    Malformed(String),
}

/// Everything an assessor may look at for one executed case.
#[derive(Debug, Clone, Copy)]
pub struct AssessmentInput<'a> {
    pub capability: &'a Capability,
    pub case: &'a TestCase,
    pub outcome: &'a InvocationOutcome,
}

impl AssessmentInput<'_> {
    /// Failed call or an in-band `isError` result.
    pub fn is_error_response(&self) -> bool {
        !self.outcome.success() || self.outcome.result.is_tool_error()
    }
}

/// Scores one response. Error responses are scored too.
#[async_trait]
pub trait QualityAssessor: Send + Sync {
    async fn assess(&self, input: AssessmentInput<'_>) -> Result<QualityAssessment, AssessmentError>;
}

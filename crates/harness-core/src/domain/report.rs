//! Per-test results and the aggregate per-target report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::assessment::{DimensionScores, QualityAssessment};
use super::capability::Capability;
use super::outcome::{CallResult, InvocationOutcome, Transcript};
use super::test_case::{Difficulty, TestCase, TestCategory};

/// One executed test case: the invocation outcome plus its assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub capability: String,
    pub category: TestCategory,
    pub arguments: Value,
    pub result: CallResult,
    pub latency_ms: u64,
    #[serde(default)]
    pub transcript: Transcript,
    pub description: String,
    pub expected_behavior: String,
    pub difficulty: Difficulty,
    pub assessment: QualityAssessment,
}

impl TestResult {
    pub fn new(
        capability: &str,
        case: TestCase,
        outcome: InvocationOutcome,
        assessment: QualityAssessment,
    ) -> Self {
        Self {
            capability: capability.to_string(),
            category: case.category,
            arguments: case.arguments,
            result: outcome.result,
            latency_ms: outcome.latency_ms,
            transcript: outcome.transcript,
            description: case.description,
            expected_behavior: case.expected_behavior,
            difficulty: case.difficulty,
            assessment,
        }
    }

    /// Pass/fail is decided by the invocation alone; quality never affects it.
    pub fn passed(&self) -> bool {
        self.result.is_success()
    }

    pub fn quality_score(&self) -> f64 {
        self.assessment.overall_score
    }
}

/// Roll-up of all results for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySummary {
    pub test_count: usize,
    pub success_count: usize,
    pub average_quality: Option<f64>,
}

/// Aggregate quality across every result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub average_score: f64,
    pub breakdown: DimensionScores,
    pub min_score: f64,
    pub max_score: f64,
}

impl QualityMetrics {
    pub fn from_results(results: &[TestResult]) -> Option<Self> {
        if results.is_empty() {
            return None;
        }
        let scores: Vec<f64> = results.iter().map(TestResult::quality_score).collect();
        let breakdown = DimensionScores::mean(results.iter().map(|r| &r.assessment.dimensions))?;
        Some(Self {
            average_score: mean(&scores)?,
            breakdown,
            min_score: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max_score: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Which stage ended a run before any test case executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalErrorKind {
    SourceUnresolved,
    Build,
    Pull,
    Start,
    PrematureExit,
    ReadinessTimeout,
    Handshake,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalError {
    pub kind: TerminalErrorKind,
    pub message: String,
}

/// Everything learned about one target in one run. Persisted to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub target_name: String,
    pub image_reference: String,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub execution_time_ms: u64,
    pub capabilities: Vec<Capability>,
    pub results: Vec<TestResult>,
    pub capability_summaries: BTreeMap<String, CapabilitySummary>,
    pub quality: Option<QualityMetrics>,
    pub sandbox_logs: Option<String>,
    pub error: Option<TerminalError>,
    pub finished_at: DateTime<Utc>,
}

impl TestReport {
    /// Build a report from executed results. Counts are always derived from
    /// `results`, so `total == passed + failed` by construction.
    pub fn from_results(
        target_name: &str,
        image_reference: &str,
        capabilities: Vec<Capability>,
        results: Vec<TestResult>,
        sandbox_logs: Option<String>,
        execution_time_ms: u64,
    ) -> Self {
        let passed = results.iter().filter(|r| r.passed()).count();
        let mut summaries = BTreeMap::new();
        for cap in &capabilities {
            let of_cap: Vec<&TestResult> =
                results.iter().filter(|r| r.capability == cap.name).collect();
            if of_cap.is_empty() {
                continue;
            }
            let scores: Vec<f64> = of_cap.iter().map(|r| r.quality_score()).collect();
            summaries.insert(
                cap.name.clone(),
                CapabilitySummary {
                    test_count: of_cap.len(),
                    success_count: of_cap.iter().filter(|r| r.passed()).count(),
                    average_quality: mean(&scores),
                },
            );
        }
        Self {
            target_name: target_name.to_string(),
            image_reference: image_reference.to_string(),
            total_tests: results.len(),
            passed_tests: passed,
            failed_tests: results.len() - passed,
            execution_time_ms,
            quality: QualityMetrics::from_results(&results),
            capabilities,
            results,
            capability_summaries: summaries,
            sandbox_logs,
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// A zero-test report for a run that ended before executing anything.
    pub fn terminated(
        target_name: &str,
        image_reference: &str,
        kind: TerminalErrorKind,
        message: impl Into<String>,
        sandbox_logs: Option<String>,
        execution_time_ms: u64,
    ) -> Self {
        let mut report = Self::from_results(
            target_name,
            image_reference,
            Vec::new(),
            Vec::new(),
            sandbox_logs,
            execution_time_ms,
        );
        report.error = Some(TerminalError {
            kind,
            message: message.into(),
        });
        report
    }

    /// Percentage of passed tests; 0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.passed_tests as f64 / self.total_tests as f64 * 100.0
        }
    }

    pub fn average_quality(&self) -> Option<f64> {
        self.quality.as_ref().map(|q| q.average_score)
    }
}

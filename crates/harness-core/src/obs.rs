//! Structured lifecycle events for harness runs.
//!
//! Every orchestration runs inside a [`run_span`]; the `emit_*` functions
//! log the run's milestones with stable `event` names.

use tracing::{info, warn, Span};

use crate::domain::{TerminalErrorKind, TestReport};

/// Span wrapping one orchestration of `target`. Attach with
/// `tracing::Instrument::instrument` so it follows the task across awaits.
pub fn run_span(target: &str) -> Span {
    tracing::info_span!("harness.run", target = %target)
}

pub fn emit_run_started(target: &str) {
    info!(event = "run.started", target = %target);
}

pub fn emit_capabilities_discovered(target: &str, count: usize) {
    info!(event = "run.capabilities_discovered", target = %target, count);
}

pub fn emit_case_finished(capability: &str, success: bool, latency_ms: u64, score: f64) {
    info!(
        event = "run.case_finished",
        capability = %capability,
        success,
        latency_ms,
        score,
    );
}

pub fn emit_run_terminated(target: &str, kind: TerminalErrorKind, message: &str) {
    warn!(event = "run.terminated", target = %target, ?kind, error = %message);
}

pub fn emit_run_finished(report: &TestReport) {
    info!(
        event = "run.finished",
        target = %report.target_name,
        total = report.total_tests,
        passed = report.passed_tests,
        failed = report.failed_tests,
        duration_ms = report.execution_time_ms,
        success_rate = report.success_rate(),
    );
}

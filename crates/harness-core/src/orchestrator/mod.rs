//! Per-target test runs: sandbox, session, generation, assessment, report.
//!
//! [`Orchestrator::test_target`] never fails. Every outcome, including
//! sandbox and handshake failures, is a [`TestReport`]; cleanup (final logs,
//! session stop, instance teardown) runs whichever step failed.

pub mod launch;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::config::HarnessConfig;
use crate::domain::{
    Capability, QualityAssessment, RunOverrides, TerminalErrorKind, TestReport, TestResult,
};
use crate::external::{AssessmentInput, CatalogStore, QualityAssessor, TestCaseGenerator};
use crate::generation::fallback_case;
use crate::metrics::METRICS;
use crate::obs;
use crate::protocol::ClientOptions;
use crate::sandbox::{SandboxConfig, SandboxInstance, SandboxManager, StdioCommand};
use crate::session::TestSession;

pub use launch::{auto_detect, resolve_launch, resolve_source};

/// Why a run stopped before executing test cases.
type Terminal = (TerminalErrorKind, String);

pub struct Orchestrator {
    sandbox: Arc<SandboxManager>,
    catalog: Arc<dyn CatalogStore>,
    generator: Arc<dyn TestCaseGenerator>,
    assessor: Arc<dyn QualityAssessor>,
    config: HarnessConfig,
}

impl Orchestrator {
    pub fn new(
        sandbox: Arc<SandboxManager>,
        catalog: Arc<dyn CatalogStore>,
        generator: Arc<dyn TestCaseGenerator>,
        assessor: Arc<dyn QualityAssessor>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            sandbox,
            catalog,
            generator,
            assessor,
            config,
        }
    }

    pub fn sandbox(&self) -> &Arc<SandboxManager> {
        &self.sandbox
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run the whole test suite against `name`.
    pub async fn test_target(&self, name: &str, overrides: &RunOverrides) -> TestReport {
        self.run(name, overrides)
            .instrument(obs::run_span(name))
            .await
    }

    async fn run(&self, name: &str, overrides: &RunOverrides) -> TestReport {
        let started = Instant::now();
        METRICS.inc_runs_started();
        obs::emit_run_started(name);

        let meta = match self.catalog.get_target(name).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(target = %name, error = %e, "catalog lookup failed, continuing without metadata");
                None
            }
        };

        let report = match resolve_launch(name, meta.as_ref(), overrides, &self.config) {
            None => TestReport::terminated(
                name,
                "",
                TerminalErrorKind::SourceUnresolved,
                format!(
                    "no local source for {name} under {}",
                    self.config.repos_dir.display()
                ),
                None,
                elapsed_ms(started),
            ),
            Some(launch) => self.run_in_sandbox(name, &launch, started).await,
        };

        match &report.error {
            Some(err) => obs::emit_run_terminated(name, err.kind, &err.message),
            None => obs::emit_run_finished(&report),
        }
        METRICS.inc_runs_finished(report.error.is_some());
        report
    }

    async fn run_in_sandbox(&self, name: &str, launch: &SandboxConfig, started: Instant) -> TestReport {
        let image = match self.sandbox.prepare_image(launch).await {
            Ok(image) => image,
            Err(e) => {
                let logs = e.logs().map(str::to_string);
                return TestReport::terminated(name, "", e.terminal_kind(), e.to_string(), logs, elapsed_ms(started));
            }
        };
        let instance = match self.sandbox.start(&image, launch).await {
            Ok(instance) => instance,
            Err(e) => {
                let logs = e.logs().map(str::to_string);
                return TestReport::terminated(name, &image, e.terminal_kind(), e.to_string(), logs, elapsed_ms(started));
            }
        };

        let mut session = TestSession::for_instance(
            self.sandbox.engine(),
            &instance,
            self.stdio_command(launch),
            self.client_options(),
        );

        let body = AssertUnwindSafe(self.exercise(name, &mut session, &instance, launch))
            .catch_unwind()
            .await;

        // Always: capture logs, stop the session, remove the instance.
        let logs = self.sandbox.logs(&instance.instance_id).await;
        session.stop().await;
        self.sandbox.teardown(&instance.instance_id).await;

        let elapsed = elapsed_ms(started);
        match body {
            Ok(Ok((capabilities, results))) => {
                TestReport::from_results(name, &image, capabilities, results, Some(logs), elapsed)
            }
            Ok(Err((kind, message))) => {
                TestReport::terminated(name, &image, kind, message, Some(logs), elapsed)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "run panicked".to_string());
                TestReport::terminated(name, &image, TerminalErrorKind::Internal, message, Some(logs), elapsed)
            }
        }
    }

    /// Readiness, handshake, then every capability in discovery order.
    async fn exercise(
        &self,
        name: &str,
        session: &mut TestSession,
        instance: &SandboxInstance,
        launch: &SandboxConfig,
    ) -> Result<(Vec<Capability>, Vec<TestResult>), Terminal> {
        self.sandbox
            .await_ready(instance, launch.startup_timeout())
            .await
            .map_err(|e| (e.terminal_kind(), e.to_string()))?;

        if !session.start().await {
            let reason = session.last_error().unwrap_or("handshake failed").to_string();
            return Err((TerminalErrorKind::Handshake, reason));
        }
        let capabilities = session.capabilities().to_vec();
        obs::emit_capabilities_discovered(name, capabilities.len());

        let mut results = Vec::new();
        for capability in &capabilities {
            self.exercise_capability(session, capability, &mut results)
                .await;
        }
        Ok((capabilities, results))
    }

    async fn exercise_capability(
        &self,
        session: &mut TestSession,
        capability: &Capability,
        results: &mut Vec<TestResult>,
    ) {
        let max_cases = self.config.max_cases_per_capability;
        let mut cases = match self.generator.generate(capability, max_cases).await {
            Ok(cases) => cases,
            Err(e) => {
                warn!(capability = %capability.name, error = %e, "test generation failed");
                Vec::new()
            }
        };
        cases.truncate(max_cases);
        if cases.is_empty() {
            debug!(capability = %capability.name, "no generated cases, using minimal fallback");
            cases.push(fallback_case(capability));
        }
        info!(capability = %capability.name, cases = cases.len(), "exercising capability");

        for case in cases {
            if !results.is_empty() {
                tokio::time::sleep(self.config.call_pause()).await;
            }
            let outcome = session.invoke(&capability.name, case.arguments.clone()).await;
            METRICS.inc_test_cases();

            let input = AssessmentInput {
                capability,
                case: &case,
                outcome: &outcome,
            };
            let assessment = match self.assessor.assess(input).await {
                Ok(assessment) => assessment,
                Err(e) => {
                    warn!(capability = %capability.name, error = %e, "assessment failed, using neutral score");
                    QualityAssessment::neutral(format!("assessment unavailable: {e}"), input.is_error_response())
                }
            };
            obs::emit_case_finished(
                &capability.name,
                outcome.success(),
                outcome.latency_ms,
                assessment.overall_score,
            );
            results.push(TestResult::new(&capability.name, case, outcome, assessment));
        }
    }

    fn stdio_command(&self, launch: &SandboxConfig) -> StdioCommand {
        match launch.entry_argv() {
            Some(argv) => StdioCommand::Exec {
                argv,
                workdir: self.config.workdir.clone(),
            },
            None => StdioCommand::Attach,
        }
    }

    fn client_options(&self) -> ClientOptions {
        ClientOptions {
            request_timeout: self.config.request_timeout(),
            disconnect_grace: self.config.disconnect_grace(),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

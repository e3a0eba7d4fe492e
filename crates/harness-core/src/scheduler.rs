//! Single-flight scheduling: at most one run per target at a time.
//!
//! The scheduler is the only surface the triggering layer talks to:
//! `trigger`, `status`, `enable`/`disable` and `cleanup_all`. `retest`
//! and `should_test` serve manual re-runs and auto-test sweeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{RunOverrides, TargetMetadata, TestReport, TestStatus};
use crate::error::{HarnessError, Result};
use crate::orchestrator::Orchestrator;
use crate::registry::{RunGuard, RunRegistry};

/// What `trigger` did with a request.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A background run was spawned; the handle resolves once its report
    /// is saved and the target is released.
    Scheduled(JoinHandle<()>),
    Disabled,
    AlreadyRunning,
}

impl TriggerOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, TriggerOutcome::Scheduled(_))
    }
}

/// Snapshot returned by [`Scheduler::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running_targets: Vec<String>,
    pub running_count: usize,
}

#[derive(Clone)]
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    enabled: Arc<AtomicBool>,
    registry: RunRegistry,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, enabled: bool) -> Self {
        Self {
            orchestrator,
            enabled: Arc::new(AtomicBool::new(enabled)),
            registry: RunRegistry::new(),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "testing toggled");
    }

    pub fn enable(&self) {
        self.set_enabled(true);
    }

    pub fn disable(&self) {
        self.set_enabled(false);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_running(&self, target: &str) -> bool {
        self.registry.is_running(target)
    }

    /// Whether an automatic sweep should trigger `meta`.
    pub fn should_test(&self, meta: &TargetMetadata) -> bool {
        self.is_enabled() && !meta.is_external_config && !self.is_running(&meta.name)
    }

    pub fn status(&self) -> SchedulerStatus {
        let running_targets = self.registry.running();
        SchedulerStatus {
            enabled: self.is_enabled(),
            running_count: running_targets.len(),
            running_targets,
        }
    }

    /// Schedule a background run of `target`. The claim happens before this
    /// returns, so a second call for the same target is a no-op until the
    /// first run has finished.
    pub fn trigger(&self, target: &str, overrides: Option<RunOverrides>) -> TriggerOutcome {
        if !self.is_enabled() {
            debug!(target = %target, "testing disabled, trigger ignored");
            return TriggerOutcome::Disabled;
        }
        let Some(guard) = self.registry.try_claim(target) else {
            info!(target = %target, "run already in progress, trigger ignored");
            return TriggerOutcome::AlreadyRunning;
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        let overrides = overrides.unwrap_or_default();
        let handle = tokio::spawn(async move {
            run_claimed(&orchestrator, guard, &overrides).await;
        });
        TriggerOutcome::Scheduled(handle)
    }

    /// Run `target` in the caller's task under the same single-flight
    /// guard and return its report.
    pub async fn retest(&self, target: &str, overrides: Option<RunOverrides>) -> Result<TestReport> {
        if !self.is_enabled() {
            return Err(HarnessError::TestingDisabled);
        }
        let guard = self
            .registry
            .try_claim(target)
            .ok_or_else(|| HarnessError::AlreadyRunning(target.to_string()))?;
        Ok(run_claimed(&self.orchestrator, guard, &overrides.unwrap_or_default()).await)
    }

    /// Remove every instance this process tracks, then any harness-named
    /// instance the engine still lists. Returns how many were removed.
    pub async fn cleanup_all(&self) -> Result<usize> {
        let sandbox = self.orchestrator.sandbox();
        let tracked = sandbox.teardown_all().await;
        let orphans = sandbox.prune_orphans().await?;
        info!(tracked, orphans, "cleanup finished");
        Ok(tracked + orphans)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("enabled", &self.is_enabled())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Mark running, orchestrate, save. The registry entry goes with `guard`.
async fn run_claimed(orchestrator: &Orchestrator, guard: RunGuard, overrides: &RunOverrides) -> TestReport {
    let target = guard.target().to_string();
    let catalog = orchestrator.catalog();

    if let Err(e) = catalog.set_test_status(&target, TestStatus::Running).await {
        warn!(target = %target, error = %e, "could not mark target running");
    }
    let report = orchestrator.test_target(&target, overrides).await;
    if let Err(e) = catalog.save_test_report(&target, &report).await {
        warn!(target = %target, error = %e, "could not save test report");
    }
    drop(guard);
    report
}

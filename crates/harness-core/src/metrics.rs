//! Global atomic counters for harness observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a batch).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    runs_started: AtomicU64,
    runs_finished: AtomicU64,
    runs_failed: AtomicU64,
    test_cases_executed: AtomicU64,
    instances_torn_down: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_finished: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            test_cases_executed: AtomicU64::new(0),
            instances_torn_down: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    /// Counts every finished run; runs ending with a terminal error also
    /// bump `runs_failed`.
    pub fn inc_runs_finished(&self, failed: bool) {
        self.runs_finished.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(metric = "runs_finished", failed, "counter incremented");
    }

    pub fn inc_test_cases(&self) {
        self.test_cases_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "test_cases_executed", "counter incremented");
    }

    pub fn inc_instances_torn_down(&self) {
        self.instances_torn_down.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "instances_torn_down", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            runs_finished = self.runs_finished(),
            runs_failed = self.runs_failed(),
            test_cases_executed = self.test_cases_executed(),
            instances_torn_down = self.instances_torn_down(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_finished(&self) -> u64 {
        self.runs_finished.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn test_cases_executed(&self) -> u64 {
        self.test_cases_executed.load(Ordering::Relaxed)
    }

    pub fn instances_torn_down(&self) -> u64 {
        self.instances_torn_down.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.runs_finished.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.test_cases_executed.store(0, Ordering::Relaxed);
        self.instances_torn_down.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_runs_started();
        m.inc_runs_started();
        assert_eq!(m.runs_started(), 2);

        m.inc_runs_finished(false);
        m.inc_runs_finished(true);
        assert_eq!(m.runs_finished(), 2);
        assert_eq!(m.runs_failed(), 1);

        m.inc_test_cases();
        m.inc_instances_torn_down();
        assert_eq!(m.test_cases_executed(), 1);
        assert_eq!(m.instances_torn_down(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_runs_started();
        m.inc_runs_finished(true);
        m.inc_test_cases();
        m.inc_instances_torn_down();
        m.reset();
        assert_eq!(m.runs_started(), 0);
        assert_eq!(m.runs_failed(), 0);
        assert_eq!(m.test_cases_executed(), 0);
        assert_eq!(m.instances_torn_down(), 0);
    }
}

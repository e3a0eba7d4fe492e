//! Process-wide set of targets currently under test.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared, lock-guarded set of running target names. Cheap to clone; all
/// clones see the same set.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    running: Arc<Mutex<BTreeSet<String>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check-and-add as one step. `None` when `target` is already running;
    /// otherwise the entry lives until the returned guard is dropped.
    pub fn try_claim(&self, target: &str) -> Option<RunGuard> {
        if !self.set().insert(target.to_string()) {
            return None;
        }
        Some(RunGuard {
            registry: self.clone(),
            target: target.to_string(),
        })
    }

    pub fn is_running(&self, target: &str) -> bool {
        self.set().contains(target)
    }

    /// Running targets in name order.
    pub fn running(&self) -> Vec<String> {
        self.set().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.set().is_empty()
    }
}

/// Registry entry for one run; removes it on drop, including when the run
/// panics.
#[derive(Debug)]
pub struct RunGuard {
    registry: RunRegistry,
    target: String,
}

impl RunGuard {
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.set().remove(&self.target);
    }
}

//! Test cases produced by a generator and consumed by the orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a test case is probing for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    /// Everyday usage a real client would send.
    Realistic,
    /// Valid but unusual inputs (empty strings, zero, boundaries).
    EdgeCase,
    /// Inputs that should be rejected gracefully.
    Invalid,
    /// Large or deeply nested inputs.
    Stress,
}

impl std::fmt::Display for TestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestCategory::Realistic => write!(f, "realistic"),
            TestCategory::EdgeCase => write!(f, "edge_case"),
            TestCategory::Invalid => write!(f, "invalid"),
            TestCategory::Stress => write!(f, "stress"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// A single generated input for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub category: TestCategory,
    pub arguments: Value,
    pub expected_behavior: String,
    pub description: String,
    #[serde(default)]
    pub difficulty: Difficulty,
}

impl TestCase {
    pub fn new(category: TestCategory, arguments: Value) -> Self {
        Self {
            category,
            arguments,
            expected_behavior: String::new(),
            description: String::new(),
            difficulty: Difficulty::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected_behavior = expected.into();
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }
}

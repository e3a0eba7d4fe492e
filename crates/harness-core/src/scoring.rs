//! Heuristic quality scoring of capability responses.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{CallResult, DimensionScores, QualityAssessment, TransportFailure};
use crate::external::{AssessmentError, AssessmentInput, QualityAssessor};

/// Text a response carries: MCP `content[].text` items joined, or the
/// serialised value for non-MCP payloads.
fn response_text(value: &Value) -> String {
    match value.get("content").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        None => match value {
            Value::Null => String::new(),
            Value::Object(map) if map.is_empty() => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

/// Whether `value` is a well-formed MCP tool result (`content` array of
/// typed items).
fn is_mcp_content(value: &Value) -> bool {
    value
        .get("content")
        .and_then(Value::as_array)
        .map(|items| items.iter().all(|i| i.get("type").and_then(Value::as_str).is_some()))
        .unwrap_or(false)
}

/// Rule-based stand-in for a model-backed assessor. Deterministic and
/// never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAssessor;

impl HeuristicAssessor {
    pub fn new() -> Self {
        Self
    }

    fn assess_error(message: &str) -> QualityAssessment {
        let clear = !message.trim().is_empty();
        let score = if clear { 6.0 } else { 4.0 };
        let mut a = QualityAssessment::from_dimensions(
            DimensionScores::uniform(score),
            if clear {
                "Error response with an explanatory message"
            } else {
                "Error response without an explanation"
            },
            true,
        );
        if clear {
            a.strengths.push("Explains why the call failed".into());
        } else {
            a.weaknesses.push("Error carries no message".into());
            a.suggestions.push("Return a descriptive error message".into());
        }
        a
    }

    /// No reply at all says nothing about the tool's output, only that it
    /// failed to produce one.
    fn assess_transport_failure(failure: &TransportFailure) -> QualityAssessment {
        let mut a = QualityAssessment::from_dimensions(
            DimensionScores::uniform(1.0),
            "No usable response was received",
            true,
        );
        a.weaknesses.push(failure.to_string());
        a.suggestions
            .push("Answer every request with a well-formed response within the timeout".into());
        a
    }

    fn assess_success(value: &Value) -> QualityAssessment {
        let text = response_text(value);
        let has_content = !text.trim().is_empty();
        let structured = is_mcp_content(value);

        let dims = DimensionScores {
            relevance: if has_content { 7.0 } else { 3.0 },
            accuracy: if has_content { 6.0 } else { 4.0 },
            completeness: match text.trim().len() {
                0 => 2.0,
                1..=19 => 5.0,
                _ => 7.0,
            },
            usability: if structured { 8.0 } else { 5.0 },
            format: if structured { 9.0 } else { 6.0 },
        };
        let mut a = QualityAssessment::from_dimensions(dims, "Heuristic assessment of a successful response", false);
        if has_content {
            a.strengths.push("Returns non-empty content".into());
        } else {
            a.weaknesses.push("Response is empty".into());
            a.suggestions.push("Return content describing the result".into());
        }
        if structured {
            a.strengths.push("Uses typed MCP content items".into());
        } else {
            a.weaknesses.push("Result is not a typed content list".into());
        }
        a
    }
}

#[async_trait]
impl QualityAssessor for HeuristicAssessor {
    async fn assess(&self, input: AssessmentInput<'_>) -> Result<QualityAssessment, AssessmentError> {
        Ok(match &input.outcome.result {
            CallResult::Error(err) => Self::assess_error(&err.message),
            CallResult::Transport(failure) => Self::assess_transport_failure(failure),
            CallResult::Success(value) if input.outcome.result.is_tool_error() => {
                Self::assess_error(&response_text(value))
            }
            CallResult::Success(value) => Self::assess_success(value),
        })
    }
}

//! Deterministic test-case generation from a capability's input schema.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::domain::{Capability, Difficulty, TestCase, TestCategory};
use crate::external::{GenerationError, TestCaseGenerator};

pub const FALLBACK_DESCRIPTION: &str = "Basic functionality check with minimal valid arguments";
const FALLBACK_EXPECTED: &str = "Should execute successfully with basic valid input";

const STRESS_STRING_LEN: usize = 10_000;
const STRESS_ARRAY_LEN: usize = 1_000;

/// JSON schema type of a property; untyped properties count as strings.
fn schema_type(schema: &Value) -> &str {
    match schema.get("type") {
        Some(Value::String(t)) => t,
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or("string"),
        _ => "string",
    }
}

fn basic_value(schema: &Value) -> Value {
    if let Some(default) = schema.get("default") {
        return default.clone();
    }
    match schema_type(schema) {
        "number" | "integer" => json!(1),
        "boolean" => json!(true),
        "array" => json!([]),
        "object" => json!({}),
        _ => json!("test"),
    }
}

/// Minimal valid arguments: every required property, nothing else.
pub fn minimal_arguments(capability: &Capability) -> Value {
    let properties = capability.properties();
    let mut args = Map::new();
    for name in capability.required_properties() {
        let schema = properties
            .and_then(|p| p.get(name))
            .cloned()
            .unwrap_or(Value::Null);
        args.insert(name.to_string(), basic_value(&schema));
    }
    Value::Object(args)
}

/// The single case run when a generator yields nothing.
pub fn fallback_case(capability: &Capability) -> TestCase {
    TestCase::new(TestCategory::Realistic, minimal_arguments(capability))
        .with_description(FALLBACK_DESCRIPTION)
        .with_expected(FALLBACK_EXPECTED)
        .with_difficulty(Difficulty::Easy)
}

/// Case counts per category for a batch of `max_cases`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quotas {
    pub realistic: usize,
    pub edge: usize,
    pub invalid: usize,
    pub stress: usize,
}

impl Quotas {
    pub fn for_batch(max_cases: usize) -> Self {
        Self {
            realistic: (max_cases / 2).max(3),
            edge: (max_cases / 4).min(3),
            invalid: (max_cases / 4).min(2),
            stress: usize::from(max_cases > 8),
        }
    }
}

/// Rule-based stand-in for a model-backed generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedGenerator;

impl RuleBasedGenerator {
    pub fn new() -> Self {
        Self
    }

    fn realistic(cap: &Capability) -> Vec<TestCase> {
        let minimal = minimal_arguments(cap);
        let mut full = minimal.as_object().cloned().unwrap_or_default();
        let mut sampled = Map::new();
        if let Some(props) = cap.properties() {
            for (name, schema) in props {
                full.entry(name.clone()).or_insert_with(|| basic_value(schema));
                sampled.insert(name.clone(), sample_value(name, schema));
            }
        }

        let mut cases = vec![TestCase::new(TestCategory::Realistic, minimal)
            .with_description(format!("Typical call to {} with required arguments", cap.name))
            .with_expected("Returns a successful, relevant result")
            .with_difficulty(Difficulty::Easy)];
        for (args, description) in [
            (Value::Object(full), "All documented arguments supplied"),
            (Value::Object(sampled), "Representative values for every argument"),
        ] {
            if cases.iter().any(|c| c.arguments == args) {
                continue;
            }
            cases.push(
                TestCase::new(TestCategory::Realistic, args)
                    .with_description(description)
                    .with_expected("Returns a successful, relevant result"),
            );
        }
        cases
    }

    fn edge(cap: &Capability) -> Vec<TestCase> {
        let Some(props) = cap.properties() else {
            return Vec::new();
        };
        let required = cap.required_properties();
        let mut empty = Map::new();
        let mut boundary = Map::new();
        for (name, schema) in props.iter().filter(|(n, _)| required.contains(&n.as_str())) {
            let (e, b) = match schema_type(schema) {
                "number" | "integer" => (json!(0), json!(-1)),
                "boolean" => (json!(false), json!(false)),
                "array" => (json!([]), json!([null])),
                "object" => (json!({}), json!({"": null})),
                _ => (json!(""), json!("ünïcødé ✓ \"quoted\" \n newline")),
            };
            empty.insert(name.clone(), e);
            boundary.insert(name.clone(), b);
        }
        if empty.is_empty() {
            return Vec::new();
        }
        vec![
            TestCase::new(TestCategory::EdgeCase, Value::Object(empty))
                .with_description("Empty or zero values for required arguments")
                .with_expected("Handles empty input gracefully")
                .with_difficulty(Difficulty::Medium),
            TestCase::new(TestCategory::EdgeCase, Value::Object(boundary))
                .with_description("Boundary values: negatives, unicode, nulls")
                .with_expected("Handles unusual but valid input without crashing")
                .with_difficulty(Difficulty::Hard),
        ]
    }

    fn invalid(cap: &Capability) -> Vec<TestCase> {
        let required = cap.required_properties();
        let mut cases = Vec::new();
        if let Some(props) = cap.properties() {
            let mut wrong = minimal_arguments(cap).as_object().cloned().unwrap_or_default();
            let target = props
                .iter()
                .find(|(n, _)| required.contains(&n.as_str()))
                .or_else(|| props.iter().next());
            if let Some((name, schema)) = target {
                let bad = match schema_type(schema) {
                    "number" | "integer" => json!("not_a_number"),
                    "boolean" => json!("not_a_boolean"),
                    "array" => json!("not_an_array"),
                    "object" => json!("not_an_object"),
                    _ => json!(123),
                };
                wrong.insert(name.clone(), bad);
                cases.push(
                    TestCase::new(TestCategory::Invalid, Value::Object(wrong))
                        .with_description(format!("Wrong type for argument `{name}`"))
                        .with_expected("Rejects the call with a clear validation error"),
                );
            }
        }
        if !required.is_empty() {
            cases.push(
                TestCase::new(TestCategory::Invalid, json!({}))
                    .with_description("Required arguments omitted")
                    .with_expected("Rejects the call and names the missing arguments"),
            );
        }
        cases
    }

    fn stress(cap: &Capability) -> Vec<TestCase> {
        let Some(props) = cap.properties() else {
            return Vec::new();
        };
        let mut args = Map::new();
        for (name, schema) in props {
            let v = match schema_type(schema) {
                "number" | "integer" => json!(i64::from(i32::MAX)),
                "boolean" => json!(true),
                "array" => Value::Array(vec![json!("item"); STRESS_ARRAY_LEN]),
                "object" => json!({ "payload": "x".repeat(STRESS_STRING_LEN) }),
                _ => json!("x".repeat(STRESS_STRING_LEN)),
            };
            args.insert(name.clone(), v);
        }
        if args.is_empty() {
            return Vec::new();
        }
        vec![TestCase::new(TestCategory::Stress, Value::Object(args))
            .with_description("Large inputs for every argument")
            .with_expected("Completes or fails cleanly without hanging")
            .with_difficulty(Difficulty::Hard)]
    }
}

fn sample_value(name: &str, schema: &Value) -> Value {
    if let Some(first) = schema.get("enum").and_then(Value::as_array).and_then(|e| e.first()) {
        return first.clone();
    }
    if let Some(example) = schema.get("examples").and_then(Value::as_array).and_then(|e| e.first()) {
        return example.clone();
    }
    match schema_type(schema) {
        "number" => json!(42.5),
        "integer" => json!(42),
        "boolean" => json!(false),
        "array" => match schema.get("items") {
            Some(items) => json!([sample_value(name, items)]),
            None => json!(["sample"]),
        },
        "object" => json!({}),
        _ => json!(format!("sample {name}")),
    }
}

#[async_trait]
impl TestCaseGenerator for RuleBasedGenerator {
    async fn generate(
        &self,
        capability: &Capability,
        max_cases: usize,
    ) -> Result<Vec<TestCase>, GenerationError> {
        let quotas = Quotas::for_batch(max_cases);
        let mut cases = Vec::new();
        cases.extend(Self::realistic(capability).into_iter().take(quotas.realistic));
        cases.extend(Self::edge(capability).into_iter().take(quotas.edge));
        cases.extend(Self::invalid(capability).into_iter().take(quotas.invalid));
        cases.extend(Self::stress(capability).into_iter().take(quotas.stress));
        cases.truncate(max_cases);
        Ok(cases)
    }
}

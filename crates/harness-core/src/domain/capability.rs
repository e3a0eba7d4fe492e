//! Discovered capabilities (MCP tools).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One callable tool exposed by a target, as reported by `tools/list`.
///
/// Produced once per session during discovery; read-only afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the `arguments` object. `{}` when the server omits it.
    #[serde(default = "empty_schema", rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    Value::Object(Default::default())
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Names of the schema's `required` properties, in declaration order.
    pub fn required_properties(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|req| req.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// The schema's `properties` object, if any.
    pub fn properties(&self) -> Option<&serde_json::Map<String, Value>> {
        self.input_schema.get("properties").and_then(Value::as_object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tools_list_entry() {
        let entry = json!({
            "name": "search",
            "description": "Search documents",
            "inputSchema": {
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }
        });
        let cap: Capability = serde_json::from_value(entry).unwrap();
        assert_eq!(cap.name, "search");
        assert_eq!(cap.required_properties(), vec!["query"]);
        assert!(cap.properties().unwrap().contains_key("query"));
    }

    #[test]
    fn test_missing_description_and_schema_default() {
        let cap: Capability = serde_json::from_value(json!({"name": "ping"})).unwrap();
        assert_eq!(cap.description, "");
        assert_eq!(cap.input_schema, json!({}));
        assert!(cap.required_properties().is_empty());
        assert!(cap.properties().is_none());
    }
}

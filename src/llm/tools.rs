//! Tool definition normalization and streaming tool-call assembly.
//!
//! Operator-supplied tool definitions arrive in three shapes seen in the
//! wild: fully nested (`{"type":"function","function":{...}}`), partially
//! nested (`{"name", "description", "parameters"}`) and flat (schema keys
//! spliced into the top level). All three normalize to one canonical
//! [`ToolSpec`] before they reach the wire.

use serde::{Deserialize, Serialize};

/// Canonical tool definition sent to the completion backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name the model calls it by.
    pub name: String,
    /// Natural-language description.
    pub description: String,
    /// JSON-schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A completed tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier correlating the external result.
    pub call_id: String,
    /// Tool name.
    pub name: String,
    /// JSON-encoded argument string.
    pub arguments: String,
}

/// Normalize a raw tool definition into a [`ToolSpec`].
///
/// Returns `None` when no tool name can be found in any accepted shape.
pub fn normalize_tool(raw: &serde_json::Value) -> Option<ToolSpec> {
    // Fully nested: unwrap the "function" envelope and recurse.
    if let Some(function) = raw.get("function") {
        return normalize_tool(function);
    }

    let name = raw.get("name")?.as_str()?.to_owned();
    if name.is_empty() {
        return None;
    }
    let description = raw
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or_default()
        .to_owned();

    // Partially nested: a ready-made parameters schema.
    if let Some(parameters) = raw.get("parameters") {
        return Some(ToolSpec {
            name,
            description,
            parameters: parameters.clone(),
        });
    }

    // Flat: schema keys at the top level; wrap them into an object schema.
    let mut schema = serde_json::Map::new();
    schema.insert("type".into(), serde_json::json!("object"));
    schema.insert(
        "properties".into(),
        raw.get("properties")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({})),
    );
    if let Some(required) = raw.get("required") {
        schema.insert("required".into(), required.clone());
    }
    Some(ToolSpec {
        name,
        description,
        parameters: serde_json::Value::Object(schema),
    })
}

/// Normalize a whole tool list, dropping entries with no recoverable name.
pub fn normalize_tools(raw: &[serde_json::Value]) -> Vec<ToolSpec> {
    raw.iter().filter_map(normalize_tool).collect()
}

/// Assembles one streamed tool call from incremental chunks.
///
/// Backends stream the call id and name once and the JSON argument string in
/// fragments; the builder concatenates until the stream finishes.
#[derive(Debug, Default)]
pub struct ToolCallBuilder {
    call_id: String,
    name: String,
    arguments: String,
}

impl ToolCallBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one streamed chunk into the call under assembly.
    pub fn push(&mut self, id: Option<&str>, name: Option<&str>, args_fragment: Option<&str>) {
        if let Some(id) = id
            && !id.is_empty()
        {
            self.call_id = id.to_owned();
        }
        if let Some(name) = name
            && !name.is_empty()
        {
            self.name = name.to_owned();
        }
        if let Some(fragment) = args_fragment {
            self.arguments.push_str(fragment);
        }
    }

    /// Whether any chunk has arrived.
    pub fn is_active(&self) -> bool {
        !self.name.is_empty() || !self.call_id.is_empty() || !self.arguments.is_empty()
    }

    /// Finish assembly; yields the call when a name was seen.
    pub fn finish(self) -> Option<ToolCall> {
        if self.name.is_empty() {
            return None;
        }
        Some(ToolCall {
            call_id: self.call_id,
            name: self.name,
            arguments: if self.arguments.is_empty() {
                "{}".to_owned()
            } else {
                self.arguments
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── normalization ─────────────────────────────────────────

    #[test]
    fn nested_shape() {
        let raw = json!({
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Current weather",
                "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
            }
        });
        let spec = normalize_tool(&raw);
        match spec {
            Some(spec) => {
                assert_eq!(spec.name, "get_weather");
                assert_eq!(spec.parameters["properties"]["city"]["type"], "string");
            }
            None => unreachable!("nested shape normalizes"),
        }
    }

    #[test]
    fn partially_nested_shape() {
        let raw = json!({
            "name": "transfer_call",
            "description": "Transfer to a human",
            "parameters": {"type": "object", "properties": {"queue": {"type": "string"}}}
        });
        let spec = normalize_tool(&raw);
        assert_eq!(spec.map(|s| s.name), Some("transfer_call".to_owned()));
    }

    #[test]
    fn flat_shape_wraps_schema() {
        let raw = json!({
            "name": "book_slot",
            "description": "Book an appointment",
            "properties": {"date": {"type": "string"}},
            "required": ["date"]
        });
        match normalize_tool(&raw) {
            Some(spec) => {
                assert_eq!(spec.parameters["type"], "object");
                assert_eq!(spec.parameters["properties"]["date"]["type"], "string");
                assert_eq!(spec.parameters["required"][0], "date");
            }
            None => unreachable!("flat shape normalizes"),
        }
    }

    #[test]
    fn all_shapes_converge() {
        let parameters = json!({"type": "object", "properties": {"q": {"type": "string"}}});
        let nested = json!({"type": "function", "function": {"name": "f", "description": "d", "parameters": parameters}});
        let partial = json!({"name": "f", "description": "d", "parameters": parameters});
        assert_eq!(normalize_tool(&nested), normalize_tool(&partial));
    }

    #[test]
    fn nameless_entry_dropped() {
        let raw = vec![json!({"description": "no name"}), json!({"name": "kept"})];
        let specs = normalize_tools(&raw);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "kept");
    }

    #[test]
    fn missing_description_defaults_empty() {
        let spec = normalize_tool(&json!({"name": "f"}));
        assert_eq!(spec.map(|s| s.description), Some(String::new()));
    }

    // ── streaming assembly ────────────────────────────────────

    #[test]
    fn fragments_concatenate() {
        let mut builder = ToolCallBuilder::new();
        builder.push(Some("call_1"), Some("get_weather"), None);
        builder.push(None, None, Some(r#"{"city":"#));
        builder.push(None, None, Some(r#""Karachi"}"#));
        match builder.finish() {
            Some(call) => {
                assert_eq!(call.call_id, "call_1");
                assert_eq!(call.name, "get_weather");
                assert_eq!(call.arguments, r#"{"city":"Karachi"}"#);
            }
            None => unreachable!("call assembles"),
        }
    }

    #[test]
    fn empty_builder_finishes_to_none() {
        assert!(ToolCallBuilder::new().finish().is_none());
        assert!(!ToolCallBuilder::new().is_active());
    }

    #[test]
    fn empty_arguments_default_to_object() {
        let mut builder = ToolCallBuilder::new();
        builder.push(Some("c"), Some("noop"), None);
        assert_eq!(builder.finish().map(|c| c.arguments), Some("{}".to_owned()));
    }

    #[test]
    fn later_empty_ids_do_not_clobber() {
        let mut builder = ToolCallBuilder::new();
        builder.push(Some("call_1"), Some("f"), None);
        builder.push(Some(""), Some(""), Some("{}"));
        assert_eq!(builder.finish().map(|c| c.call_id), Some("call_1".to_owned()));
    }
}

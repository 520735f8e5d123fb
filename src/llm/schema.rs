//! MCP tool schema to Gemini function declaration conversion
//!
//! MCP servers describe tool arguments with arbitrary JSON Schema, while
//! Gemini accepts only a small OpenAPI subset. Conversion keeps the parts
//! Gemini understands (type, description, enum, items, properties,
//! required) and drops everything else, falling back to permissive defaults
//! instead of rejecting a tool.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::llm::types::{FunctionDeclaration, Schema, SchemaType, Tool as LlmTool};
use crate::mcp::types::Tool;

/// Nested objects deeper than this are flattened to strings
const MAX_SCHEMA_DEPTH: usize = 8;

/// Convert one MCP tool into a Gemini function declaration
pub fn to_function_declaration(tool: &Tool) -> FunctionDeclaration {
    tracing::debug!("Converting MCP tool '{}' to function declaration", tool.name);

    let parameters = match tool.input_schema.as_object() {
        Some(schema) => convert_object(&tool.name, schema, 0),
        None => {
            tracing::warn!(
                "No input schema or malformed schema for tool {}. Tool will have no parameters.",
                tool.name
            );
            Schema::empty_object()
        }
    };

    let description = match tool.description.as_deref().map(str::trim) {
        Some(d) if !d.is_empty() => d.to_string(),
        _ => {
            tracing::warn!("Tool '{}' has missing/empty description, using default", tool.name);
            format!("Tool to perform {}", tool.name)
        }
    };

    FunctionDeclaration {
        name: tool.name.clone(),
        description,
        parameters: Some(parameters),
    }
}

/// Convert a server's tool list into the `tools` field of a request
///
/// Returns `None` when no tool could be converted, so the request carries no
/// function-calling configuration at all.
pub fn prepare_tools(tools: &[Tool]) -> Option<Vec<LlmTool>> {
    if tools.is_empty() {
        tracing::debug!("No MCP tools provided to prepare for LLM");
        return None;
    }

    tracing::debug!("Preparing {} MCP tools for LLM", tools.len());
    let declarations: Vec<FunctionDeclaration> = tools
        .iter()
        .filter(|tool| {
            let named = !tool.name.trim().is_empty();
            if !named {
                tracing::warn!("Skipping an unnamed MCP tool");
            }
            named
        })
        .map(to_function_declaration)
        .collect();

    if declarations.is_empty() {
        tracing::info!("No MCP tools were successfully converted for LLM");
        return None;
    }

    tracing::info!(
        "LLM tools configured: {:?}",
        declarations.iter().map(|d| d.name.as_str()).collect::<Vec<_>>()
    );
    Some(vec![LlmTool {
        function_declarations: declarations,
    }])
}

/// Object schema from a JSON-Schema object with `properties`/`required`
fn convert_object(tool: &str, schema: &Map<String, Value>, depth: usize) -> Schema {
    let mut properties = BTreeMap::new();

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (name, prop) in props {
            match prop.as_object() {
                Some(prop) => {
                    properties.insert(name.clone(), convert_property(tool, name, prop, depth));
                }
                None => {
                    tracing::warn!("Skipping malformed property {} in tool {}", name, tool);
                }
            }
        }
    }

    let required = required_names(tool, schema, &properties);

    Schema {
        properties: Some(properties),
        required,
        ..Schema::of(SchemaType::Object)
    }
}

fn convert_property(tool: &str, name: &str, prop: &Map<String, Value>, depth: usize) -> Schema {
    let mut schema_type = property_type(tool, name, prop);
    if depth >= MAX_SCHEMA_DEPTH && matches!(schema_type, SchemaType::Object | SchemaType::Array) {
        tracing::warn!(
            "Property '{}' in tool '{}' is nested too deeply, treating it as string",
            name,
            tool
        );
        schema_type = SchemaType::String;
    }

    let mut schema = match schema_type {
        SchemaType::Object => convert_object(tool, prop, depth + 1),
        SchemaType::Array => Schema {
            items: Some(Box::new(convert_items(tool, name, prop.get("items"), depth))),
            ..Schema::of(SchemaType::Array)
        },
        other => Schema::of(other),
    };

    schema.description = prop
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    schema.enum_values = prop.get("enum").and_then(Value::as_array).map(|values| {
        values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    });

    schema
}

fn convert_items(tool: &str, name: &str, items: Option<&Value>, depth: usize) -> Schema {
    match items.and_then(Value::as_object) {
        Some(items) => convert_property(tool, name, items, depth + 1),
        None => {
            tracing::debug!(
                "Array property '{}' in tool '{}' missing or has invalid 'items'. Defaulting to string items.",
                name,
                tool
            );
            Schema::of(SchemaType::String)
        }
    }
}

/// Resolve the `type` keyword; accepts a string or a list of strings
fn property_type(tool: &str, name: &str, prop: &Map<String, Value>) -> SchemaType {
    let declared = match prop.get("type") {
        None => return SchemaType::String,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| !t.eq_ignore_ascii_case("null")),
        Some(_) => None,
    };

    match declared.and_then(SchemaType::from_json_type) {
        Some(schema_type) => schema_type,
        None => {
            let shown = prop.get("type").map(|v| v.to_string()).unwrap_or_default();
            tracing::warn!(
                "Invalid type {} for {} in tool {}, defaulting to string",
                shown,
                name,
                tool
            );
            SchemaType::String
        }
    }
}

fn required_names(
    tool: &str,
    schema: &Map<String, Value>,
    properties: &BTreeMap<String, Schema>,
) -> Option<Vec<String>> {
    let list = schema.get("required")?.as_array()?;
    let names: Option<Vec<&str>> = list.iter().map(Value::as_str).collect();
    let Some(names) = names else {
        tracing::warn!("Ignoring non-string 'required' entries in tool {}", tool);
        return None;
    };

    let kept: Vec<String> = names
        .into_iter()
        .filter(|name| {
            let known = properties.contains_key(*name);
            if !known {
                tracing::warn!(
                    "Dropping required parameter '{}' of tool {}: no such property",
                    name,
                    tool
                );
            }
            known
        })
        .map(str::to_string)
        .collect();

    (!kept.is_empty()).then_some(kept)
}

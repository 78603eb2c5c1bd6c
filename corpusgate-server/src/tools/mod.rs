// Copyright 2025 Corpusgate Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tool Registry.
//!
//! A static table of named operations invokable by external agent clients.
//! Each tool declares its argument schema as a list of field descriptors
//! interpreted by one generic validator, so validation error messages are
//! formatted identically across tools and every failing field is reported,
//! not just the first.
//!
//! The registry is built once at startup and immutable thereafter; lookup
//! by name is O(1) through a side index over the ordered tool list.

pub mod handlers;

use crate::config::GatewayConfig;
use crate::directory::{SettingsCache, TenantDirectory};
use crate::upstream::SearchBackend;
use async_trait::async_trait;
use corpusgate_core::TenantId;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Primitive kind of one tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer,
    Boolean,
}

impl ArgKind {
    fn json_type(self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Integer => "integer",
            ArgKind::Boolean => "boolean",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            ArgKind::Integer => value.is_i64() || value.is_u64(),
            ArgKind::Boolean => value.is_boolean(),
        }
    }
}

fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_f64() => "a fractional number",
        Value::Number(_) => "an integer",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Descriptor for one tool argument.
#[derive(Debug, Clone)]
pub struct ArgField {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ArgField {
    pub fn required(name: &'static str, kind: ArgKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            description,
        }
    }

    pub fn optional(name: &'static str, kind: ArgKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            description,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Immutable definition of one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub args: Vec<ArgField>,
}

impl ToolSpec {
    /// JSON argument schema advertised to agent clients.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.args {
            let mut prop = json!({
                "type": field.kind.json_type(),
                "description": field.description,
            });
            if let Some(default) = &field.default {
                prop["default"] = default.clone();
            }
            properties.insert(field.name.to_string(), prop);
            if field.required {
                required.push(Value::String(field.name.to_string()));
            }
        }

        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }
}

/// Validated arguments, with declared defaults already applied.
#[derive(Debug, Clone, Default)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(|v| v.as_i64())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(|v| v.as_bool())
    }
}

/// Validate raw arguments against a tool's descriptors.
///
/// Reports every failing field path and reason. Unknown extra fields are
/// ignored; agent clients routinely send them.
pub fn validate_arguments(spec: &ToolSpec, raw: &Value) -> Result<ToolArgs, Vec<String>> {
    let supplied: Map<String, Value> = match raw {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(vec![format!(
                "arguments: expected an object, got {}",
                describe_value(other)
            )])
        }
    };

    let mut failures = Vec::new();
    let mut validated = Map::new();

    for field in &spec.args {
        match supplied.get(field.name) {
            Some(Value::Null) | None => {
                if field.required {
                    failures.push(format!("{}: required field is missing", field.name));
                } else if let Some(default) = &field.default {
                    validated.insert(field.name.to_string(), default.clone());
                }
            }
            Some(value) => {
                if field.kind.matches(value) {
                    validated.insert(field.name.to_string(), value.clone());
                } else {
                    failures.push(format!(
                        "{}: expected {}, got {}",
                        field.name,
                        match field.kind {
                            ArgKind::String => "a string",
                            ArgKind::Integer => "an integer",
                            ArgKind::Boolean => "a boolean",
                        },
                        describe_value(value)
                    ));
                }
            }
        }
    }

    if failures.is_empty() {
        Ok(ToolArgs(validated))
    } else {
        Err(failures)
    }
}

/// Result of a tool invocation. Both variants travel back as successful
/// protocol responses; `Error` is an in-band failure whose text must be
/// self-explanatory to an agent that only sees the text.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Ok(String),
    Error(String),
}

impl ToolOutcome {
    pub fn ok(text: impl Into<String>) -> Self {
        Self::Ok(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error(text.into())
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Ok(text) | Self::Error(text) => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Everything a handler may touch. Built once at startup and shared;
/// request-local state stays on the stack of each invocation.
pub struct ToolContext {
    pub directory: Arc<dyn TenantDirectory>,
    pub settings: Arc<SettingsCache>,
    pub search: Arc<dyn SearchBackend>,
    pub public_base_url: String,
    pub default_model: String,
}

impl ToolContext {
    pub fn new(
        config: &GatewayConfig,
        directory: Arc<dyn TenantDirectory>,
        settings: Arc<SettingsCache>,
        search: Arc<dyn SearchBackend>,
    ) -> Self {
        Self {
            directory,
            settings,
            search,
            public_base_url: config.server.public_base_url.trim_end_matches('/').to_string(),
            default_model: config.upstream.model.clone(),
        }
    }
}

/// One tool's behavior. Receives validated arguments and the session's
/// resolved tenant; never re-authenticates.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        ctx: &ToolContext,
        args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome;
}

pub struct RegisteredTool {
    pub spec: ToolSpec,
    pub handler: Arc<dyn ToolHandler>,
}

/// Ordered, immutable collection of tools keyed by name.
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<(ToolSpec, Arc<dyn ToolHandler>)>) -> Self {
        let mut ordered = Vec::with_capacity(tools.len());
        let mut index = HashMap::with_capacity(tools.len());
        for (spec, handler) in tools {
            debug_assert!(
                !index.contains_key(spec.name),
                "duplicate tool name: {}",
                spec.name
            );
            index.insert(spec.name, ordered.len());
            ordered.push(RegisteredTool { spec, handler });
        }
        Self {
            tools: ordered,
            index,
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter().map(|t| &t.spec)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: "chat",
            description: "test",
            args: vec![
                ArgField::required("message", ArgKind::String, "the message"),
                ArgField::optional("limit", ArgKind::Integer, "max results")
                    .with_default(json!(20)),
                ArgField::optional("verbose", ArgKind::Boolean, "verbosity"),
            ],
        }
    }

    #[test]
    fn valid_arguments_pass_and_defaults_apply() {
        let args = validate_arguments(&spec(), &json!({ "message": "hi" })).unwrap();
        assert_eq!(args.get_str("message"), Some("hi"));
        assert_eq!(args.get_i64("limit"), Some(20));
        assert_eq!(args.get_bool("verbose"), None);
    }

    #[test]
    fn every_failing_field_is_reported() {
        let raw = json!({ "limit": "twenty", "verbose": 3 });
        let failures = validate_arguments(&spec(), &raw).unwrap_err();
        assert_eq!(failures.len(), 3);
        assert!(failures.iter().any(|f| f.contains("message")));
        assert!(failures
            .iter()
            .any(|f| f.contains("limit") && f.contains("expected an integer")));
        assert!(failures.iter().any(|f| f.contains("verbose")));
    }

    #[test]
    fn null_arguments_treated_as_empty_object() {
        let failures = validate_arguments(&spec(), &Value::Null).unwrap_err();
        assert_eq!(failures, vec!["message: required field is missing"]);
    }

    #[test]
    fn non_object_arguments_rejected() {
        let failures = validate_arguments(&spec(), &json!([1, 2])).unwrap_err();
        assert!(failures[0].contains("expected an object"));
    }

    #[test]
    fn explicit_null_counts_as_missing() {
        let args = validate_arguments(
            &spec(),
            &json!({ "message": "hi", "limit": null }),
        )
        .unwrap();
        assert_eq!(args.get_i64("limit"), Some(20));
    }

    #[test]
    fn input_schema_lists_required_fields() {
        let schema = spec().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["message"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["default"], 20);
        assert_eq!(schema["required"], json!(["message"]));
    }
}

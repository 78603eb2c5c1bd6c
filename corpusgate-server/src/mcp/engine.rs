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

//! Protocol Engine.
//!
//! Dispatches one raw JSON-RPC frame at a time against the tool registry.
//! Stateless per call: all session affinity (which tenant, which push
//! stream) is resolved by the caller and passed in, so invocations may run
//! concurrently within and across sessions.

use super::protocol::{
    CallToolResult, RpcRequest, RpcResponse, ToolDescriptor, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};
use crate::activity::{ActivityKind, ActivityLog};
use crate::tools::{validate_arguments, ToolContext, ToolRegistry};
use corpusgate_core::TenantId;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};

pub struct ProtocolEngine {
    registry: Arc<ToolRegistry>,
    tools: Arc<ToolContext>,
    activity: Arc<ActivityLog>,
    /// `tools/list` result, serialized once. The registry is immutable, so
    /// every listing call returns this same snapshot.
    list_snapshot: OnceLock<Value>,
}

impl ProtocolEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        tools: Arc<ToolContext>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        Self {
            registry,
            tools,
            activity,
            list_snapshot: OnceLock::new(),
        }
    }

    /// Handle one inbound frame. Returns `None` for notifications, which
    /// never produce a response.
    pub async fn dispatch(
        &self,
        session_id: &str,
        tenant: Option<&TenantId>,
        raw: &str,
    ) -> Option<RpcResponse> {
        let request: RpcRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(err) => {
                return Some(RpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {err}"),
                ))
            }
        };

        if request.is_notification() {
            tracing::debug!(session_id, method = %request.method, "Ignoring notification");
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        if !request.jsonrpc.is_empty() && request.jsonrpc != super::protocol::JSONRPC_VERSION {
            return Some(RpcResponse::failure(
                id,
                INVALID_REQUEST,
                format!("Unsupported jsonrpc version: {}", request.jsonrpc),
            ));
        }

        tracing::debug!(session_id, method = %request.method, "Dispatching request");

        let response = match request.method.as_str() {
            "initialize" => RpcResponse::success(id, self.initialize_result()),
            "ping" => RpcResponse::success(id, json!({})),
            "tools/list" => RpcResponse::success(id, self.list_snapshot().clone()),
            "tools/call" => self.call_tool(id, session_id, tenant, request.params).await,
            other => RpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        };
        Some(response)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    fn list_snapshot(&self) -> &Value {
        self.list_snapshot.get_or_init(|| {
            let tools: Vec<ToolDescriptor> = self
                .registry
                .specs()
                .map(|spec| ToolDescriptor {
                    name: spec.name.to_string(),
                    description: spec.description.to_string(),
                    input_schema: spec.input_schema(),
                })
                .collect();
            json!({ "tools": tools })
        })
    }

    async fn call_tool(
        &self,
        id: Value,
        session_id: &str,
        tenant: Option<&TenantId>,
        params: Option<Value>,
    ) -> RpcResponse {
        let params = params.unwrap_or(Value::Null);
        let Some(name) = params["name"].as_str() else {
            return RpcResponse::failure(
                id,
                INVALID_PARAMS,
                "Missing required parameter: name",
            );
        };

        let Some(registered) = self.registry.get(name) else {
            return RpcResponse::failure(id, INVALID_PARAMS, format!("Unknown tool: {name}"));
        };

        let args = match validate_arguments(&registered.spec, &params["arguments"]) {
            Ok(args) => args,
            Err(failures) => {
                return RpcResponse::failure(
                    id,
                    INVALID_PARAMS,
                    format!("Invalid arguments for {}: {}", name, failures.join("; ")),
                )
            }
        };

        self.activity.count_tool(name);
        let outcome = registered.handler.call(&self.tools, &args, tenant).await;
        if outcome.is_error() {
            self.activity.record(
                ActivityKind::ToolFailed,
                format!("{name} failed on session {session_id}"),
            );
            tracing::info!(session_id, tool = name, "Tool returned in-band error");
        } else {
            self.activity
                .record(ActivityKind::ToolInvoked, format!("{name} on session {session_id}"));
        }

        let result = CallToolResult::text(outcome.text().to_string(), outcome.is_error());
        match serde_json::to_value(result) {
            Ok(value) => RpcResponse::success(id, value),
            Err(err) => RpcResponse::failure(
                id,
                INTERNAL_ERROR,
                format!("Failed to encode result: {err}"),
            ),
        }
    }
}

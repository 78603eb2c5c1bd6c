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

//! Operational endpoints: health, status, and log maintenance.

use crate::mcp::transport::{extract_credential, StreamQuery};
use crate::GatewayContext;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

/// `GET /mcp/health`: liveness probe, no credential required.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn authorize(
    ctx: &GatewayContext,
    headers: &HeaderMap,
    api_key: Option<&str>,
) -> Result<(), Response> {
    let credential = extract_credential(headers, api_key);
    if ctx.auth.resolve(&credential).await.valid {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid or missing credential" })),
        )
            .into_response())
    }
}

/// `GET /mcp/status`: live sessions, recent history, activity log, and
/// per-tool invocation counters. Credential-gated.
pub async fn status(
    State(ctx): State<Arc<GatewayContext>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&ctx, &headers, query.api_key.as_deref()).await {
        return rejection;
    }

    Json(json!({
        "open_mode": ctx.auth.open_mode(),
        "live_session_count": ctx.sessions.live_count(),
        "live_sessions": ctx.sessions.live_sessions(),
        "recent_sessions": ctx.sessions.recent_history(),
        "activity": ctx.activity.entries(),
        "tool_counters": ctx.activity.tool_counters(),
    }))
    .into_response()
}

/// `POST /mcp/logs/clear`: drop activity entries, keep counters.
pub async fn clear_logs(
    State(ctx): State<Arc<GatewayContext>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&ctx, &headers, query.api_key.as_deref()).await {
        return rejection;
    }

    ctx.activity.clear();
    Json(json!({ "status": "cleared" })).into_response()
}

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

//! SSE transport for the agent-tool protocol.
//!
//! A client opens `GET /mcp/sse`; the first event on the stream is an
//! `endpoint` event naming the request side-channel
//! (`/mcp/messages?sessionId=...`). JSON-RPC requests are POSTed there and
//! answered over the stream, correlated by the session token the server
//! issued. The token is a routing correlator only; identity was fixed when
//! the stream opened and is never re-derived from the POST.
//!
//! Session teardown is driven by the stream itself: when the client
//! disconnects (or a heartbeat write fails), the stream future is dropped
//! and its guard closes the session.

use crate::activity::ActivityKind;
use crate::session::HEARTBEAT_INTERVAL_SECS;
use crate::GatewayContext;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Bearer token from the Authorization header, else the `api_key` query
/// parameter. Empty when neither is present.
pub(crate) fn extract_credential(headers: &HeaderMap, api_key: Option<&str>) -> String {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return token.trim().to_string();
            }
        }
    }
    api_key.unwrap_or_default().to_string()
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Closes the session when the SSE stream future is dropped, whatever the
/// cause: client disconnect, server shutdown, or a failed write.
struct CloseOnDrop {
    ctx: Arc<GatewayContext>,
    session_id: String,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if self.ctx.sessions.close(&self.session_id) {
            self.ctx.activity.record(
                ActivityKind::SessionClosed,
                format!("session {} disconnected", self.session_id),
            );
        }
    }
}

/// `GET /mcp/sse`: authenticate, register a session, and stream responses.
pub async fn sse_handler(
    State(ctx): State<Arc<GatewayContext>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let credential = extract_credential(&headers, query.api_key.as_deref());

    let resolution = ctx.auth.resolve(&credential).await;
    if !resolution.valid {
        ctx.activity
            .record(ActivityKind::AuthRejected, "stream open rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid or missing credential" })),
        )
            .into_response();
    }

    let (session, mut outbound) = ctx.sessions.register(resolution.tenant, credential);
    ctx.activity.record(
        ActivityKind::SessionOpened,
        format!(
            "session {} opened (tenant: {})",
            session.id,
            session
                .tenant
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "none".to_string())
        ),
    );

    let endpoint = format!("/mcp/messages?sessionId={}", session.id);
    let guard = CloseOnDrop {
        ctx: ctx.clone(),
        session_id: session.id.clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;

        yield Ok::<Event, Infallible>(Event::default().event("endpoint").data(endpoint));

        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        // The first tick fires immediately; burn it.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => {
                            yield Ok(Event::default().event("message").data(frame));
                        }
                        // Sender side gone: the session was force-closed.
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok(Event::default().comment("heartbeat"));
                }
            }
        }
    };

    Sse::new(stream).into_response()
}

/// `POST /mcp/messages?sessionId=...`: the request side-channel.
///
/// The response travels over the session's SSE stream; the POST itself only
/// acknowledges receipt. An unknown or already-closed session token is a
/// structural 404, never a fallback to some shared identity.
pub async fn message_handler(
    State(ctx): State<Arc<GatewayContext>>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(session) = ctx.sessions.get(&query.session_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found" })),
        )
            .into_response();
    };

    let response = ctx
        .engine
        .dispatch(&session.id, session.tenant.as_ref(), &body)
        .await;

    if let Some(response) = response {
        match serde_json::to_string(&response) {
            Ok(frame) => {
                // The session may have closed while the handler ran; the
                // result is then discarded, not an error.
                if session.push(frame).await.is_err() {
                    tracing::debug!(
                        session_id = %session.id,
                        "Discarding response for closed session"
                    );
                }
            }
            Err(err) => {
                tracing::error!(session_id = %session.id, "Failed to encode response: {}", err);
            }
        }
    }

    (StatusCode::ACCEPTED, "Accepted").into_response()
}

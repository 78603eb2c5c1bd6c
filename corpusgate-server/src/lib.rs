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

//! Corpusgate: a protocol gateway exposing tenant-scoped document search to
//! AI agents over a streaming JSON-RPC tool protocol.
//!
//! One process-scoped [`GatewayContext`] owns every piece of shared state
//! (auth cache, session table, tool registry, activity log); it is built at
//! startup and injected into the HTTP layer. No module-level singletons.

pub mod activity;
pub mod api;
pub mod auth;
pub mod config;
pub mod directory;
pub mod mcp;
pub mod session;
pub mod tools;
pub mod upstream;

use crate::activity::ActivityLog;
use crate::auth::AuthResolver;
use crate::config::GatewayConfig;
use crate::directory::{HttpDirectory, MemoryDirectory, SettingsCache, TenantDirectory};
use crate::mcp::engine::ProtocolEngine;
use crate::session::SessionManager;
use crate::tools::handlers::build_registry;
use crate::tools::ToolContext;
use crate::upstream::{GenerativeSearchClient, SearchBackend};
use anyhow::Result;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Process-scoped shared state, constructed once at startup.
pub struct GatewayContext {
    pub config: GatewayConfig,
    pub auth: AuthResolver,
    pub sessions: SessionManager,
    pub engine: ProtocolEngine,
    pub activity: Arc<ActivityLog>,
}

impl GatewayContext {
    /// Wire the gateway together. `directory` is `None` in open mode; the
    /// tool layer still gets an empty in-memory directory so handlers have
    /// a uniform seam.
    pub fn new(
        config: GatewayConfig,
        directory: Option<Arc<dyn TenantDirectory>>,
        search: Arc<dyn SearchBackend>,
    ) -> Self {
        let activity = Arc::new(ActivityLog::new());
        let auth = AuthResolver::with_default_ttl(directory.clone());
        let directory =
            directory.unwrap_or_else(|| Arc::new(MemoryDirectory::new()) as Arc<dyn TenantDirectory>);

        let tools = Arc::new(ToolContext::new(
            &config,
            directory,
            Arc::new(SettingsCache::default()),
            search,
        ));
        let engine = ProtocolEngine::new(Arc::new(build_registry()), tools, activity.clone());

        Self {
            config,
            auth,
            sessions: SessionManager::new(),
            engine,
            activity,
        }
    }
}

fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Build the HTTP surface over a prepared context. Split out so tests can
/// drive the router without binding a socket.
pub fn build_router(ctx: Arc<GatewayContext>) -> Router {
    let cors = cors_layer(&ctx.config);

    Router::new()
        .route("/mcp/sse", get(mcp::transport::sse_handler))
        .route("/mcp/messages", post(mcp::transport::message_handler))
        .route("/mcp/health", get(api::health))
        .route("/mcp/status", get(api::status))
        .route("/mcp/logs/clear", post(api::clear_logs))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

/// Validate configuration, build the context, and serve until shutdown.
pub async fn run_server(config: GatewayConfig) -> Result<()> {
    config.validate()?;

    let directory: Option<Arc<dyn TenantDirectory>> =
        match (&config.directory.url, &config.directory.anon_key) {
            (Some(url), Some(anon_key)) => {
                tracing::info!("Tenant directory: {}", url);
                Some(Arc::new(HttpDirectory::new(url.clone(), anon_key.clone())))
            }
            _ => None,
        };

    let search: Arc<dyn SearchBackend> = Arc::new(GenerativeSearchClient::new(
        config.upstream.base_url.clone(),
        config.upstream.api_key.clone(),
        Duration::from_secs(config.upstream.request_timeout_secs),
    ));

    let addr = config.socket_addr();
    let ctx = Arc::new(GatewayContext::new(config, directory, search));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Gateway listening on {}", addr);
    axum::serve(listener, build_router(ctx)).await?;
    Ok(())
}

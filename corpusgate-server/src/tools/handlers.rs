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

//! The gateway's tool set.
//!
//! Handlers return [`ToolOutcome`]; application-level failures (missing
//! store, upstream outage, no tenant) are in-band errors with actionable
//! text, never protocol-level errors. Every tenant-scoped handler refuses
//! to proceed when the session carries no tenant.

use super::{
    ArgField, ArgKind, ToolArgs, ToolContext, ToolHandler, ToolOutcome, ToolRegistry, ToolSpec,
};
use crate::upstream::SearchRequest;
use async_trait::async_trait;
use corpusgate_core::{DirectoryError, KnowledgeStore, TenantId, UpstreamError};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;

const DEFAULT_DOCUMENT_LIMIT: i64 = 20;

/// Resolve a caller-supplied store reference against the tenant's stores.
/// Priority: exact id, exact display name, case-insensitive substring of
/// the display name. First match wins at each level.
pub fn resolve_store_reference<'a>(
    stores: &'a [KnowledgeStore],
    reference: &str,
) -> Option<&'a KnowledgeStore> {
    if let Some(store) = stores.iter().find(|s| s.id == reference) {
        return Some(store);
    }
    if let Some(store) = stores.iter().find(|s| s.display_name == reference) {
        return Some(store);
    }
    let needle = reference.to_lowercase();
    stores
        .iter()
        .find(|s| s.display_name.to_lowercase().contains(&needle))
}

fn require_tenant<'a>(tenant: Option<&'a TenantId>) -> Result<&'a TenantId, ToolOutcome> {
    tenant.ok_or_else(|| {
        ToolOutcome::error(
            "This session has no tenant identity, so tenant-scoped tools are unavailable. \
             Connect with a gateway API key.",
        )
    })
}

fn directory_failure(err: DirectoryError) -> ToolOutcome {
    tracing::warn!("Directory operation failed: {}", err);
    ToolOutcome::error(format!("Backend lookup failed: {err}"))
}

fn upstream_failure(err: UpstreamError) -> ToolOutcome {
    tracing::warn!("Upstream search failed: {}", err);
    ToolOutcome::error(format!("Search failed: {err}"))
}

fn available_stores_hint(stores: &[KnowledgeStore]) -> String {
    if stores.is_empty() {
        return "This tenant has no knowledge stores.".to_string();
    }
    let names: Vec<String> = stores
        .iter()
        .map(|s| format!("{} (id: {})", s.display_name, s.id))
        .collect();
    format!("Available stores: {}", names.join(", "))
}

async fn tenant_stores(
    ctx: &ToolContext,
    tenant: &TenantId,
) -> Result<Vec<KnowledgeStore>, ToolOutcome> {
    ctx.directory
        .list_stores(tenant)
        .await
        .map_err(directory_failure)
}

/// Fuzzy-resolve an explicit store reference, or fall back to the tenant's
/// active-store setting. Used by the tools whose `storeId` is optional.
async fn resolve_target_store(
    ctx: &ToolContext,
    tenant: &TenantId,
    reference: Option<&str>,
) -> Result<KnowledgeStore, ToolOutcome> {
    if let Some(reference) = reference {
        let stores = tenant_stores(ctx, tenant).await?;
        return match resolve_store_reference(&stores, reference) {
            Some(store) => Ok(store.clone()),
            None => Err(ToolOutcome::error(format!(
                "Store '{}' not found. {}",
                reference,
                available_stores_hint(&stores)
            ))),
        };
    }

    let settings = ctx
        .settings
        .get_or_load(tenant, &ctx.directory)
        .await
        .map_err(directory_failure)?;

    let Some(active_id) = settings.active_store_id else {
        return Err(ToolOutcome::error(
            "No active store is set. Pass a storeId, or call set_active_store first.",
        ));
    };

    match ctx
        .directory
        .get_store(tenant, &active_id)
        .await
        .map_err(directory_failure)?
    {
        Some(store) => Ok(store),
        None => Err(ToolOutcome::error(format!(
            "The active store '{active_id}' no longer exists. Call set_active_store to pick \
             another one.",
        ))),
    }
}

async fn run_search(
    ctx: &ToolContext,
    query: String,
    store_handles: Vec<String>,
    model: Option<&str>,
    system_prompt: Option<String>,
) -> ToolOutcome {
    let request = SearchRequest {
        query,
        store_handles,
        model: model.unwrap_or(&ctx.default_model).to_string(),
        system_prompt,
        history: Vec::new(),
    };
    match ctx.search.search(request).await {
        Ok(reply) => ToolOutcome::ok(reply.rendered()),
        Err(err) => upstream_failure(err),
    }
}

/// `chat`: search the active (or explicitly named) store.
struct ChatTool;

#[async_trait]
impl ToolHandler for ChatTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let tenant = match require_tenant(tenant) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let message = args.get_str("message").unwrap_or_default().to_string();

        // Explicit storeId is taken verbatim: an id the tenant does not own
        // must not resolve, so this is an exact ownership-checked lookup.
        let store = if let Some(store_id) = args.get_str("storeId") {
            match ctx.directory.get_store(tenant, store_id).await {
                Ok(Some(store)) => store,
                Ok(None) => {
                    return ToolOutcome::error(format!(
                        "Store '{store_id}' not found for this tenant."
                    ))
                }
                Err(err) => return directory_failure(err),
            }
        } else {
            match resolve_target_store(ctx, tenant, None).await {
                Ok(store) => store,
                Err(e) => return e,
            }
        };

        run_search(ctx, message, vec![store.handle], args.get_str("model"), None).await
    }
}

/// `chat_with_store`: like `chat` but the store reference is mandatory and
/// fuzzy-matched.
struct ChatWithStoreTool;

#[async_trait]
impl ToolHandler for ChatWithStoreTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let tenant = match require_tenant(tenant) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let message = args.get_str("message").unwrap_or_default().to_string();
        let reference = args.get_str("storeId").unwrap_or_default();

        let store = match resolve_target_store(ctx, tenant, Some(reference)).await {
            Ok(store) => store,
            Err(e) => return e,
        };

        run_search(ctx, message, vec![store.handle], args.get_str("model"), None).await
    }
}

/// `chat_all_stores`: one search spanning every store the tenant owns.
struct ChatAllStoresTool;

#[async_trait]
impl ToolHandler for ChatAllStoresTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let tenant = match require_tenant(tenant) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let message = args.get_str("message").unwrap_or_default().to_string();

        let stores = match tenant_stores(ctx, tenant).await {
            Ok(stores) => stores,
            Err(e) => return e,
        };
        if stores.is_empty() {
            return ToolOutcome::error(
                "This tenant has no knowledge stores, so there is nothing to search.",
            );
        }

        // The upstream API takes every handle in one call; never fan out
        // one request per store.
        let handles = stores.into_iter().map(|s| s.handle).collect();
        run_search(ctx, message, handles, args.get_str("model"), None).await
    }
}

struct ListStoresTool;

#[async_trait]
impl ToolHandler for ListStoresTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        _args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let tenant = match require_tenant(tenant) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let stores = match tenant_stores(ctx, tenant).await {
            Ok(stores) => stores,
            Err(e) => return e,
        };
        if stores.is_empty() {
            return ToolOutcome::ok("No knowledge stores exist for this tenant yet.");
        }

        let mut out = String::from("Knowledge stores:\n");
        for store in &stores {
            let _ = writeln!(
                out,
                "- {} (id: {}, {} documents)",
                store.display_name, store.id, store.document_count
            );
        }
        ToolOutcome::ok(out.trim_end().to_string())
    }
}

struct GetActiveStoreTool;

#[async_trait]
impl ToolHandler for GetActiveStoreTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        _args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let tenant = match require_tenant(tenant) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let settings = match ctx.settings.get_or_load(tenant, &ctx.directory).await {
            Ok(settings) => settings,
            Err(err) => return directory_failure(err),
        };
        let Some(active_id) = settings.active_store_id else {
            return ToolOutcome::ok(
                "No active store is set. Call set_active_store to choose one.",
            );
        };

        match ctx.directory.get_store(tenant, &active_id).await {
            Ok(Some(store)) => ToolOutcome::ok(format!(
                "Active store: {} (id: {})",
                store.display_name, store.id
            )),
            Ok(None) => ToolOutcome::ok(format!(
                "Active store is set to '{active_id}', but that store no longer exists."
            )),
            Err(err) => directory_failure(err),
        }
    }
}

struct SetActiveStoreTool;

#[async_trait]
impl ToolHandler for SetActiveStoreTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let tenant = match require_tenant(tenant) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let reference = args.get_str("storeId").unwrap_or_default();

        let stores = match tenant_stores(ctx, tenant).await {
            Ok(stores) => stores,
            Err(e) => return e,
        };
        let Some(store) = resolve_store_reference(&stores, reference) else {
            return ToolOutcome::error(format!(
                "Store '{}' not found. {}",
                reference,
                available_stores_hint(&stores)
            ));
        };

        // Persist the canonical id, never the caller's fuzzy reference.
        if let Err(err) = ctx.directory.set_active_store(tenant, &store.id).await {
            return directory_failure(err);
        }
        // Invalidate before returning so the next call on this session
        // reads the new pointer.
        ctx.settings.invalidate(tenant);

        ToolOutcome::ok(format!(
            "Active store set to {} (id: {}).",
            store.display_name, store.id
        ))
    }
}

struct ListDocumentsTool;

#[async_trait]
impl ToolHandler for ListDocumentsTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let tenant = match require_tenant(tenant) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let store = match resolve_target_store(ctx, tenant, args.get_str("storeId")).await {
            Ok(store) => store,
            Err(e) => return e,
        };
        let limit = args
            .get_i64("limit")
            .unwrap_or(DEFAULT_DOCUMENT_LIMIT)
            .max(1) as usize;

        let documents = match ctx.directory.list_documents(tenant, &store.id, limit).await {
            Ok(documents) => documents,
            Err(err) => return directory_failure(err),
        };
        if documents.is_empty() {
            return ToolOutcome::ok(format!(
                "No documents in store {} yet.",
                store.display_name
            ));
        }

        let mut out = format!("Documents in {}:\n", store.display_name);
        for doc in &documents {
            let _ = writeln!(
                out,
                "- {} (id: {}, {})",
                doc.display_name, doc.id, doc.mime_type
            );
        }
        ToolOutcome::ok(out.trim_end().to_string())
    }
}

struct SummarizeTool;

#[async_trait]
impl ToolHandler for SummarizeTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let tenant = match require_tenant(tenant) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let store = match resolve_target_store(ctx, tenant, args.get_str("storeId")).await {
            Ok(store) => store,
            Err(e) => return e,
        };

        let query = match args.get_str("focus") {
            Some(focus) => format!(
                "Summarize the contents of this knowledge store, focusing on: {focus}"
            ),
            None => "Summarize the contents of this knowledge store.".to_string(),
        };
        let system_prompt = Some(
            "You produce concise, well-structured summaries of document collections. \
             Lead with the main themes, then notable specifics."
                .to_string(),
        );

        run_search(
            ctx,
            query,
            vec![store.handle],
            args.get_str("model"),
            system_prompt,
        )
        .await
    }
}

struct DeleteDocumentTool;

#[async_trait]
impl ToolHandler for DeleteDocumentTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let tenant = match require_tenant(tenant) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let reference = args.get_str("documentId").unwrap_or_default();

        // Optional store scope narrows the lookup.
        let store_scope = match args.get_str("storeId") {
            Some(store_ref) => match resolve_target_store(ctx, tenant, Some(store_ref)).await {
                Ok(store) => Some(store),
                Err(e) => return e,
            },
            None => None,
        };

        let record = match ctx
            .directory
            .find_document(tenant, reference, store_scope.as_ref().map(|s| s.id.as_str()))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                return ToolOutcome::error(format!(
                    "Document '{reference}' not found for this tenant."
                ))
            }
            Err(err) => return directory_failure(err),
        };

        let store = match ctx.directory.get_store(tenant, &record.store_id).await {
            Ok(Some(store)) => store,
            Ok(None) => {
                return ToolOutcome::error(format!(
                    "The store owning document '{}' no longer exists.",
                    record.display_name
                ))
            }
            Err(err) => return directory_failure(err),
        };

        // An already-deleted upstream copy still counts as success; only
        // the tenant-owned record is authoritative.
        match ctx.search.delete_document(&store.handle, &record.id).await {
            Ok(()) | Err(UpstreamError::NotFound(_)) => {}
            Err(err) => return upstream_failure(err),
        }

        if let Err(err) = ctx.directory.delete_document(tenant, &record.id).await {
            return directory_failure(err);
        }
        ctx.settings.invalidate(tenant);

        ToolOutcome::ok(format!(
            "Deleted document {} (id: {}).",
            record.display_name, record.id
        ))
    }
}

struct GetDocumentLinkTool;

#[async_trait]
impl ToolHandler for GetDocumentLinkTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        args: &ToolArgs,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let tenant = match require_tenant(tenant) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let reference = args.get_str("documentId").unwrap_or_default();

        let store_scope = match args.get_str("storeId") {
            Some(store_ref) => match resolve_target_store(ctx, tenant, Some(store_ref)).await {
                Ok(store) => Some(store),
                Err(e) => return e,
            },
            None => None,
        };

        let record = match ctx
            .directory
            .find_document(tenant, reference, store_scope.as_ref().map(|s| s.id.as_str()))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                return ToolOutcome::error(format!(
                    "Document '{reference}' not found for this tenant."
                ))
            }
            Err(err) => return directory_failure(err),
        };

        if record.local_path.is_none() {
            return ToolOutcome::error(format!(
                "Document {} (id: {}) has no stored file to link to.",
                record.display_name, record.id
            ));
        }

        ToolOutcome::ok(format!(
            "{} ({}): {}/api/documents/{}/download",
            record.display_name, record.original_filename, ctx.public_base_url, record.id
        ))
    }
}

/// `help`: static listing of every other tool, rendered once at startup.
struct HelpTool {
    listing: String,
}

#[async_trait]
impl ToolHandler for HelpTool {
    async fn call(
        &self,
        _ctx: &ToolContext,
        _args: &ToolArgs,
        _tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        ToolOutcome::ok(self.listing.clone())
    }
}

fn message_arg() -> ArgField {
    ArgField::required("message", ArgKind::String, "The question or instruction to run against the store")
}

fn model_arg() -> ArgField {
    ArgField::optional("model", ArgKind::String, "Override the generation model for this call")
}

/// Build the gateway's complete tool set.
pub fn build_registry() -> ToolRegistry {
    let mut entries: Vec<(ToolSpec, Arc<dyn ToolHandler>)> = vec![
        (
            ToolSpec {
                name: "chat",
                description:
                    "Ask a question against your active knowledge store (or an explicitly named one) \
                     and get a grounded answer with sources.",
                args: vec![
                    message_arg(),
                    ArgField::optional("storeId", ArgKind::String, "Exact id of the store to search"),
                    model_arg(),
                ],
            },
            Arc::new(ChatTool),
        ),
        (
            ToolSpec {
                name: "chat_with_store",
                description:
                    "Ask a question against one named knowledge store. The store reference may be an \
                     id, an exact name, or a partial name.",
                args: vec![
                    message_arg(),
                    ArgField::required(
                        "storeId",
                        ArgKind::String,
                        "Store id, exact name, or partial name",
                    ),
                    model_arg(),
                ],
            },
            Arc::new(ChatWithStoreTool),
        ),
        (
            ToolSpec {
                name: "chat_all_stores",
                description: "Ask a question across every knowledge store you own in one search.",
                args: vec![message_arg(), model_arg()],
            },
            Arc::new(ChatAllStoresTool),
        ),
        (
            ToolSpec {
                name: "list_stores",
                description: "List your knowledge stores with their ids and document counts.",
                args: vec![],
            },
            Arc::new(ListStoresTool),
        ),
        (
            ToolSpec {
                name: "get_active_store",
                description: "Show which knowledge store is currently active for this tenant.",
                args: vec![],
            },
            Arc::new(GetActiveStoreTool),
        ),
        (
            ToolSpec {
                name: "set_active_store",
                description:
                    "Set the active knowledge store. Accepts an id, an exact name, or a partial name.",
                args: vec![ArgField::required(
                    "storeId",
                    ArgKind::String,
                    "Store id, exact name, or partial name",
                )],
            },
            Arc::new(SetActiveStoreTool),
        ),
        (
            ToolSpec {
                name: "list_documents",
                description: "List documents in a knowledge store (defaults to the active store).",
                args: vec![
                    ArgField::optional("storeId", ArgKind::String, "Store id, exact name, or partial name"),
                    ArgField::optional("limit", ArgKind::Integer, "Maximum number of documents to return")
                        .with_default(json!(DEFAULT_DOCUMENT_LIMIT)),
                ],
            },
            Arc::new(ListDocumentsTool),
        ),
        (
            ToolSpec {
                name: "summarize",
                description:
                    "Summarize the contents of a knowledge store (defaults to the active store), \
                     optionally focused on a topic.",
                args: vec![
                    ArgField::optional("storeId", ArgKind::String, "Store id, exact name, or partial name"),
                    ArgField::optional("focus", ArgKind::String, "Topic to focus the summary on"),
                    model_arg(),
                ],
            },
            Arc::new(SummarizeTool),
        ),
        (
            ToolSpec {
                name: "delete_document",
                description:
                    "Delete a document you own, by id or exact name. Removes both the indexed copy \
                     and the record.",
                args: vec![
                    ArgField::required("documentId", ArgKind::String, "Document id or exact name"),
                    ArgField::optional("storeId", ArgKind::String, "Restrict the lookup to one store"),
                ],
            },
            Arc::new(DeleteDocumentTool),
        ),
        (
            ToolSpec {
                name: "get_document_link",
                description: "Get a download link for a document you own, by id or exact name.",
                args: vec![
                    ArgField::required("documentId", ArgKind::String, "Document id or exact name"),
                    ArgField::optional("storeId", ArgKind::String, "Restrict the lookup to one store"),
                ],
            },
            Arc::new(GetDocumentLinkTool),
        ),
    ];

    let mut listing = String::from("Available tools:\n");
    for (spec, _) in &entries {
        let _ = writeln!(listing, "- {}: {}", spec.name, spec.description);
    }
    let listing = listing.trim_end().to_string();

    entries.push((
        ToolSpec {
            name: "help",
            description: "List all available tools and what they do.",
            args: vec![],
        },
        Arc::new(HelpTool { listing }),
    ));

    ToolRegistry::new(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MemoryDirectory, SettingsCache, TenantDirectory};
    use crate::tools::validate_arguments;
    use crate::upstream::{SearchBackend, SearchReply, SearchRequest};
    use corpusgate_core::{Citation, DocumentRecord};
    use parking_lot::Mutex;

    /// Scripted backend that records the last request it saw.
    struct StubSearch {
        reply: SearchReply,
        last_request: Mutex<Option<SearchRequest>>,
        delete_result: Mutex<Option<Result<(), UpstreamError>>>,
    }

    impl StubSearch {
        fn answering(text: &str) -> Self {
            Self {
                reply: SearchReply {
                    text: text.to_string(),
                    citations: vec![],
                },
                last_request: Mutex::new(None),
                delete_result: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SearchBackend for StubSearch {
        async fn search(&self, request: SearchRequest) -> Result<SearchReply, UpstreamError> {
            *self.last_request.lock() = Some(request);
            Ok(self.reply.clone())
        }

        async fn delete_document(
            &self,
            _store_handle: &str,
            _document_id: &str,
        ) -> Result<(), UpstreamError> {
            self.delete_result.lock().take().unwrap_or(Ok(()))
        }
    }

    fn store(id: &str, name: &str) -> KnowledgeStore {
        KnowledgeStore {
            id: id.to_string(),
            display_name: name.to_string(),
            handle: format!("stores/{id}"),
            document_count: 0,
        }
    }

    struct Fixture {
        ctx: ToolContext,
        directory: Arc<MemoryDirectory>,
        search: Arc<StubSearch>,
        registry: ToolRegistry,
    }

    fn fixture(search: StubSearch) -> Fixture {
        let directory = Arc::new(MemoryDirectory::new());
        let search = Arc::new(search);
        let ctx = ToolContext {
            directory: directory.clone(),
            settings: Arc::new(SettingsCache::default()),
            search: search.clone(),
            public_base_url: "http://localhost:3001".to_string(),
            default_model: "gemini-2.0-flash".to_string(),
        };
        Fixture {
            ctx,
            directory,
            search,
            registry: build_registry(),
        }
    }

    async fn call(
        fx: &Fixture,
        tool: &str,
        args: serde_json::Value,
        tenant: Option<&TenantId>,
    ) -> ToolOutcome {
        let registered = fx.registry.get(tool).expect("tool registered");
        let args = validate_arguments(&registered.spec, &args).expect("arguments valid");
        registered.handler.call(&fx.ctx, &args, tenant).await
    }

    #[test]
    fn store_reference_resolution_priority() {
        let stores = vec![
            store("finance", "Engineering Docs"),
            store("s2", "Finance Docs"),
            store("s3", "finance archive"),
        ];

        // Exact id beats a display name that equals the reference.
        assert_eq!(
            resolve_store_reference(&stores, "finance").unwrap().id,
            "finance"
        );
        // Exact display name beats substring.
        assert_eq!(
            resolve_store_reference(&stores, "Finance Docs").unwrap().id,
            "s2"
        );
        // Case-insensitive substring, first match wins.
        assert_eq!(
            resolve_store_reference(&stores, "ENGINEERING").unwrap().id,
            "finance"
        );
        assert!(resolve_store_reference(&stores, "legal").is_none());
    }

    #[tokio::test]
    async fn chat_without_active_store_gives_guidance() {
        let fx = fixture(StubSearch::answering("unused"));
        let tenant = TenantId::new("t-1");

        let outcome = call(&fx, "chat", json!({ "message": "hi" }), Some(&tenant)).await;
        assert!(outcome.is_error());
        assert!(outcome.text().contains("set_active_store"));
    }

    #[tokio::test]
    async fn chat_refuses_without_tenant() {
        let fx = fixture(StubSearch::answering("unused"));
        let outcome = call(&fx, "chat", json!({ "message": "hi" }), None).await;
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn chat_with_store_resolves_partial_name() {
        let fx = fixture(StubSearch::answering("grounded answer"));
        let tenant = TenantId::new("t-1");
        fx.directory.add_store(tenant.clone(), store("s1", "Finance Docs"));

        let outcome = call(
            &fx,
            "chat_with_store",
            json!({ "message": "q4 revenue?", "storeId": "finance" }),
            Some(&tenant),
        )
        .await;

        assert_eq!(outcome, ToolOutcome::ok("grounded answer"));
        let request = fx.search.last_request.lock().clone().unwrap();
        assert_eq!(request.store_handles, vec!["stores/s1"]);
        assert_eq!(request.model, "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn chat_with_unknown_store_lists_available() {
        let fx = fixture(StubSearch::answering("unused"));
        let tenant = TenantId::new("t-1");
        fx.directory.add_store(tenant.clone(), store("s1", "Finance Docs"));

        let outcome = call(
            &fx,
            "chat_with_store",
            json!({ "message": "hi", "storeId": "legal" }),
            Some(&tenant),
        )
        .await;

        assert!(outcome.is_error());
        assert!(outcome.text().contains("not found"));
        assert!(outcome.text().contains("Finance Docs"));
    }

    #[tokio::test]
    async fn chat_all_stores_spans_every_handle_in_one_call() {
        let fx = fixture(StubSearch::answering("combined"));
        let tenant = TenantId::new("t-1");
        fx.directory.add_store(tenant.clone(), store("s1", "Finance"));
        fx.directory.add_store(tenant.clone(), store("s2", "Legal"));

        let outcome = call(
            &fx,
            "chat_all_stores",
            json!({ "message": "everything?" }),
            Some(&tenant),
        )
        .await;

        assert!(!outcome.is_error());
        let request = fx.search.last_request.lock().clone().unwrap();
        assert_eq!(request.store_handles, vec!["stores/s1", "stores/s2"]);
    }

    #[tokio::test]
    async fn chat_all_stores_with_no_stores_is_in_band_error() {
        let fx = fixture(StubSearch::answering("unused"));
        let tenant = TenantId::new("t-1");
        let outcome =
            call(&fx, "chat_all_stores", json!({ "message": "hi" }), Some(&tenant)).await;
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn set_active_store_persists_canonical_id_and_takes_effect_immediately() {
        let fx = fixture(StubSearch::answering("unused"));
        let tenant = TenantId::new("t-1");
        fx.directory.add_store(tenant.clone(), store("s1", "Finance Docs"));

        // Warm the settings cache so invalidation is observable.
        let _ = call(&fx, "get_active_store", json!({}), Some(&tenant)).await;

        let outcome = call(
            &fx,
            "set_active_store",
            json!({ "storeId": "finance docs" }),
            Some(&tenant),
        )
        .await;
        assert!(!outcome.is_error());

        let settings = fx.directory.get_settings(&tenant).await.unwrap();
        assert_eq!(settings.active_store_id.as_deref(), Some("s1"));

        // The very next read on this session sees the new pointer.
        let active = call(&fx, "get_active_store", json!({}), Some(&tenant)).await;
        assert!(active.text().contains("Finance Docs"));
    }

    #[tokio::test]
    async fn chat_rejects_store_id_owned_by_another_tenant() {
        let fx = fixture(StubSearch::answering("unused"));
        fx.directory
            .add_store(TenantId::new("other"), store("s1", "Alpha"));

        let outcome = call(
            &fx,
            "chat",
            json!({ "message": "hi", "storeId": "s1" }),
            Some(&TenantId::new("t-1")),
        )
        .await;
        assert!(outcome.is_error());
        assert!(outcome.text().contains("not found"));
    }

    #[tokio::test]
    async fn delete_document_tolerates_missing_upstream_copy() {
        let fx = fixture(StubSearch::answering("unused"));
        let tenant = TenantId::new("t-1");
        fx.directory.add_store(tenant.clone(), store("s1", "Finance"));
        fx.directory.add_document(
            tenant.clone(),
            DocumentRecord {
                id: "doc-1".into(),
                display_name: "Q4 Report".into(),
                original_filename: "q4.pdf".into(),
                mime_type: "application/pdf".into(),
                store_id: "s1".into(),
                local_path: Some("files/q4.pdf".into()),
            },
        );
        *fx.search.delete_result.lock() =
            Some(Err(UpstreamError::NotFound("already gone".into())));

        let outcome = call(
            &fx,
            "delete_document",
            json!({ "documentId": "doc-1" }),
            Some(&tenant),
        )
        .await;
        assert!(!outcome.is_error(), "{}", outcome.text());

        // Record is gone.
        let found = fx.directory.find_document(&tenant, "doc-1", None).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn delete_document_fails_when_record_missing() {
        let fx = fixture(StubSearch::answering("unused"));
        let tenant = TenantId::new("t-1");

        let outcome = call(
            &fx,
            "delete_document",
            json!({ "documentId": "ghost" }),
            Some(&tenant),
        )
        .await;
        assert!(outcome.is_error());
        assert!(outcome.text().contains("not found"));
    }

    #[tokio::test]
    async fn get_document_link_uses_public_base_url() {
        let fx = fixture(StubSearch::answering("unused"));
        let tenant = TenantId::new("t-1");
        fx.directory.add_document(
            tenant.clone(),
            DocumentRecord {
                id: "doc-1".into(),
                display_name: "Q4 Report".into(),
                original_filename: "q4.pdf".into(),
                mime_type: "application/pdf".into(),
                store_id: "s1".into(),
                local_path: Some("files/q4.pdf".into()),
            },
        );

        let outcome = call(
            &fx,
            "get_document_link",
            json!({ "documentId": "Q4 Report" }),
            Some(&tenant),
        )
        .await;
        assert!(!outcome.is_error());
        assert!(outcome
            .text()
            .contains("http://localhost:3001/api/documents/doc-1/download"));
    }

    #[tokio::test]
    async fn help_lists_every_other_tool() {
        let fx = fixture(StubSearch::answering("unused"));
        let outcome = call(&fx, "help", json!({}), None).await;
        assert!(!outcome.is_error());
        for name in [
            "chat",
            "chat_with_store",
            "chat_all_stores",
            "list_stores",
            "get_active_store",
            "set_active_store",
            "list_documents",
            "summarize",
            "delete_document",
            "get_document_link",
        ] {
            assert!(outcome.text().contains(name), "missing {name}");
        }
    }

    #[tokio::test]
    async fn registry_has_expected_tool_count() {
        let registry = build_registry();
        assert_eq!(registry.len(), 11);
        assert!(registry.get("nonexistent_tool").is_none());
    }

    #[tokio::test]
    async fn summarize_includes_focus_in_query() {
        let fx = fixture(StubSearch::answering("summary"));
        let tenant = TenantId::new("t-1");
        fx.directory.add_store(tenant.clone(), store("s1", "Finance"));

        let outcome = call(
            &fx,
            "summarize",
            json!({ "storeId": "Finance", "focus": "hiring" }),
            Some(&tenant),
        )
        .await;
        assert!(!outcome.is_error());

        let request = fx.search.last_request.lock().clone().unwrap();
        assert!(request.query.contains("hiring"));
        assert!(request.system_prompt.is_some());
    }

    #[tokio::test]
    async fn rendered_reply_carries_sources() {
        let mut stub = StubSearch::answering("the answer");
        stub.reply.citations = vec![Citation {
            title: "Handbook".into(),
            locator: Some("documents/h1".into()),
        }];
        let fx = fixture(stub);
        let tenant = TenantId::new("t-1");
        fx.directory.add_store(tenant.clone(), store("s1", "Finance"));

        let outcome = call(
            &fx,
            "chat_with_store",
            json!({ "message": "hi", "storeId": "Finance" }),
            Some(&tenant),
        )
        .await;
        assert!(outcome.text().contains("Sources:"));
        assert!(outcome.text().contains("Handbook"));
    }
}

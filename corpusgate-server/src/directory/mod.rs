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

//! Tenant Data Accessor.
//!
//! All reads and patches against the authoritative store for tenant-owned
//! entities go through the [`TenantDirectory`] trait. Every query is scoped
//! to a resolved tenant identity; nothing here ever crosses tenants.
//!
//! Two implementations:
//! - [`HttpDirectory`]: PostgREST-style REST accessor used in production.
//! - [`MemoryDirectory`]: in-memory implementation for tests and for
//!   running the gateway without a configured backend.

mod http;
mod memory;

pub use http::HttpDirectory;
pub use memory::MemoryDirectory;

use async_trait::async_trait;
use corpusgate_core::{
    DirectoryError, DocumentRecord, KnowledgeStore, TenantId, TenantSettings,
};
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Read/patch operations against the authoritative tenant store.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Resolve an active gateway API key to its tenant. Returns `None` for
    /// unknown or inactive keys.
    async fn lookup_api_key(&self, credential: &str) -> Result<Option<TenantId>, DirectoryError>;

    /// Record the key's last-used timestamp. Callers treat this as a
    /// fire-and-forget side effect; failures are logged and discarded.
    async fn touch_api_key(&self, credential: &str) -> Result<(), DirectoryError>;

    async fn list_stores(&self, tenant: &TenantId) -> Result<Vec<KnowledgeStore>, DirectoryError>;

    async fn get_store(
        &self,
        tenant: &TenantId,
        store_id: &str,
    ) -> Result<Option<KnowledgeStore>, DirectoryError>;

    async fn list_documents(
        &self,
        tenant: &TenantId,
        store_id: &str,
        limit: usize,
    ) -> Result<Vec<DocumentRecord>, DirectoryError>;

    /// Find a tenant-owned document by exact id, then by exact display
    /// name, optionally restricted to one store.
    async fn find_document(
        &self,
        tenant: &TenantId,
        reference: &str,
        store_id: Option<&str>,
    ) -> Result<Option<DocumentRecord>, DirectoryError>;

    /// Delete the tenant-owned record. Fails if the record does not exist.
    async fn delete_document(
        &self,
        tenant: &TenantId,
        document_id: &str,
    ) -> Result<(), DirectoryError>;

    async fn get_settings(&self, tenant: &TenantId) -> Result<TenantSettings, DirectoryError>;

    /// Persist the tenant's active-store pointer (canonical store id only).
    async fn set_active_store(
        &self,
        tenant: &TenantId,
        store_id: &str,
    ) -> Result<(), DirectoryError>;
}

/// TTL cache in front of [`TenantDirectory::get_settings`].
///
/// Entries are whole-value replacements keyed by tenant; the two mutating
/// tools invalidate synchronously before returning so the next call on the
/// same session never sees a stale pointer.
pub struct SettingsCache {
    cache: Cache<TenantId, TenantSettings>,
}

impl SettingsCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get_or_load(
        &self,
        tenant: &TenantId,
        directory: &Arc<dyn TenantDirectory>,
    ) -> Result<TenantSettings, DirectoryError> {
        if let Some(settings) = self.cache.get(tenant) {
            return Ok(settings);
        }
        let settings = directory.get_settings(tenant).await?;
        self.cache.insert(tenant.clone(), settings.clone());
        Ok(settings)
    }

    pub fn invalidate(&self, tenant: &TenantId) {
        self.cache.invalidate(tenant);
    }
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

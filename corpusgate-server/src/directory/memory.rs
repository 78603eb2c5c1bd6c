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

//! In-memory [`TenantDirectory`] used in tests and in open mode.

use super::TenantDirectory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corpusgate_core::{
    DirectoryError, DocumentRecord, KnowledgeStore, TenantId, TenantSettings,
};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    /// credential -> (tenant, active)
    api_keys: HashMap<String, (TenantId, bool)>,
    /// credential -> last-used timestamp
    last_used: HashMap<String, DateTime<Utc>>,
    /// tenant -> stores
    stores: HashMap<TenantId, Vec<KnowledgeStore>>,
    /// tenant -> documents
    documents: HashMap<TenantId, Vec<DocumentRecord>>,
    /// tenant -> settings
    settings: HashMap<TenantId, TenantSettings>,
}

/// In-memory tenant directory. Interior mutability so tests can seed and
/// mutate through a shared `Arc<dyn TenantDirectory>`.
#[derive(Default)]
pub struct MemoryDirectory {
    inner: RwLock<Inner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_api_key(&self, credential: impl Into<String>, tenant: TenantId, active: bool) {
        self.inner
            .write()
            .api_keys
            .insert(credential.into(), (tenant, active));
    }

    pub fn add_store(&self, tenant: TenantId, store: KnowledgeStore) {
        self.inner.write().stores.entry(tenant).or_default().push(store);
    }

    pub fn add_document(&self, tenant: TenantId, document: DocumentRecord) {
        self.inner
            .write()
            .documents
            .entry(tenant)
            .or_default()
            .push(document);
    }

    /// Last-used timestamp recorded for a credential, if any.
    pub fn last_used(&self, credential: &str) -> Option<DateTime<Utc>> {
        self.inner.read().last_used.get(credential).copied()
    }
}

#[async_trait]
impl TenantDirectory for MemoryDirectory {
    async fn lookup_api_key(&self, credential: &str) -> Result<Option<TenantId>, DirectoryError> {
        let inner = self.inner.read();
        Ok(inner
            .api_keys
            .get(credential)
            .filter(|(_, active)| *active)
            .map(|(tenant, _)| tenant.clone()))
    }

    async fn touch_api_key(&self, credential: &str) -> Result<(), DirectoryError> {
        self.inner
            .write()
            .last_used
            .insert(credential.to_string(), Utc::now());
        Ok(())
    }

    async fn list_stores(&self, tenant: &TenantId) -> Result<Vec<KnowledgeStore>, DirectoryError> {
        Ok(self
            .inner
            .read()
            .stores
            .get(tenant)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_store(
        &self,
        tenant: &TenantId,
        store_id: &str,
    ) -> Result<Option<KnowledgeStore>, DirectoryError> {
        Ok(self
            .inner
            .read()
            .stores
            .get(tenant)
            .and_then(|stores| stores.iter().find(|s| s.id == store_id).cloned()))
    }

    async fn list_documents(
        &self,
        tenant: &TenantId,
        store_id: &str,
        limit: usize,
    ) -> Result<Vec<DocumentRecord>, DirectoryError> {
        Ok(self
            .inner
            .read()
            .documents
            .get(tenant)
            .map(|docs| {
                docs.iter()
                    .filter(|d| d.store_id == store_id)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_document(
        &self,
        tenant: &TenantId,
        reference: &str,
        store_id: Option<&str>,
    ) -> Result<Option<DocumentRecord>, DirectoryError> {
        let inner = self.inner.read();
        let Some(docs) = inner.documents.get(tenant) else {
            return Ok(None);
        };
        let scoped: Vec<&DocumentRecord> = docs
            .iter()
            .filter(|d| store_id.map_or(true, |s| d.store_id == s))
            .collect();

        // Exact id first, then exact display name.
        if let Some(found) = scoped.iter().find(|d| d.id == reference) {
            return Ok(Some((*found).clone()));
        }
        Ok(scoped
            .iter()
            .find(|d| d.display_name == reference)
            .map(|d| (*d).clone()))
    }

    async fn delete_document(
        &self,
        tenant: &TenantId,
        document_id: &str,
    ) -> Result<(), DirectoryError> {
        let mut inner = self.inner.write();
        let docs = inner
            .documents
            .get_mut(tenant)
            .ok_or_else(|| DirectoryError::Status {
                status: 404,
                body: format!("document not found: {document_id}"),
            })?;
        let before = docs.len();
        docs.retain(|d| d.id != document_id);
        if docs.len() == before {
            return Err(DirectoryError::Status {
                status: 404,
                body: format!("document not found: {document_id}"),
            });
        }
        Ok(())
    }

    async fn get_settings(&self, tenant: &TenantId) -> Result<TenantSettings, DirectoryError> {
        Ok(self
            .inner
            .read()
            .settings
            .get(tenant)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_active_store(
        &self,
        tenant: &TenantId,
        store_id: &str,
    ) -> Result<(), DirectoryError> {
        self.inner
            .write()
            .settings
            .entry(tenant.clone())
            .or_default()
            .active_store_id = Some(store_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(id: &str, name: &str) -> KnowledgeStore {
        KnowledgeStore {
            id: id.to_string(),
            display_name: name.to_string(),
            handle: format!("stores/{id}"),
            document_count: 0,
        }
    }

    #[tokio::test]
    async fn lookup_ignores_inactive_keys() {
        let dir = MemoryDirectory::new();
        dir.add_api_key("cg_live", TenantId::new("t-1"), true);
        dir.add_api_key("cg_revoked", TenantId::new("t-1"), false);

        assert!(dir.lookup_api_key("cg_live").await.unwrap().is_some());
        assert!(dir.lookup_api_key("cg_revoked").await.unwrap().is_none());
        assert!(dir.lookup_api_key("cg_unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stores_are_tenant_scoped() {
        let dir = MemoryDirectory::new();
        dir.add_store(TenantId::new("a"), store("s1", "Alpha"));

        assert_eq!(dir.list_stores(&TenantId::new("a")).await.unwrap().len(), 1);
        assert!(dir.list_stores(&TenantId::new("b")).await.unwrap().is_empty());
        assert!(dir
            .get_store(&TenantId::new("b"), "s1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn find_document_prefers_exact_id_over_name() {
        let dir = MemoryDirectory::new();
        let tenant = TenantId::new("a");
        dir.add_document(
            tenant.clone(),
            DocumentRecord {
                id: "doc-1".into(),
                display_name: "doc-2".into(),
                original_filename: "a.pdf".into(),
                mime_type: "application/pdf".into(),
                store_id: "s1".into(),
                local_path: None,
            },
        );
        dir.add_document(
            tenant.clone(),
            DocumentRecord {
                id: "doc-2".into(),
                display_name: "Notes".into(),
                original_filename: "b.pdf".into(),
                mime_type: "application/pdf".into(),
                store_id: "s1".into(),
                local_path: None,
            },
        );

        let found = dir.find_document(&tenant, "doc-2", None).await.unwrap();
        assert_eq!(found.unwrap().id, "doc-2");
    }

    #[tokio::test]
    async fn delete_missing_document_fails() {
        let dir = MemoryDirectory::new();
        let tenant = TenantId::new("a");
        assert!(dir.delete_document(&tenant, "nope").await.is_err());
    }
}

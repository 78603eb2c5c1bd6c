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

//! PostgREST-style HTTP implementation of [`TenantDirectory`].
//!
//! Row-level authorization is enforced by the backing store; this accessor
//! still scopes every query by tenant id so a misconfigured policy never
//! widens a read.

use super::TenantDirectory;
use async_trait::async_trait;
use chrono::Utc;
use corpusgate_core::{
    DirectoryError, DocumentRecord, KnowledgeStore, TenantId, TenantSettings,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpDirectory {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Deserialize)]
struct KeyRow {
    tenant_id: String,
}

#[derive(Deserialize)]
struct StoreRow {
    id: String,
    display_name: String,
    handle: String,
    #[serde(default)]
    document_count: u64,
}

#[derive(Deserialize)]
struct DocumentRow {
    id: String,
    display_name: String,
    original_filename: String,
    mime_type: String,
    store_id: String,
    #[serde(default)]
    local_path: Option<String>,
}

#[derive(Deserialize)]
struct SettingsRow {
    #[serde(default)]
    active_store_id: Option<String>,
}

impl From<StoreRow> for KnowledgeStore {
    fn from(row: StoreRow) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name,
            handle: row.handle,
            document_count: row.document_count,
        }
    }
}

impl From<DocumentRow> for DocumentRecord {
    fn from(row: DocumentRow) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name,
            original_filename: row.original_filename,
            mime_type: row.mime_type,
            store_id: row.store_id,
            local_path: row.local_path,
        }
    }
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    async fn fetch_rows<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, DirectoryError> {
        let response = self
            .request(self.http.get(self.table_url(table)).query(query))
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }
}

#[async_trait]
impl TenantDirectory for HttpDirectory {
    async fn lookup_api_key(&self, credential: &str) -> Result<Option<TenantId>, DirectoryError> {
        let rows: Vec<KeyRow> = self
            .fetch_rows(
                "gateway_keys",
                &[
                    ("select", "tenant_id".to_string()),
                    ("key", format!("eq.{credential}")),
                    ("active", "is.true".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().map(|row| TenantId(row.tenant_id)))
    }

    async fn touch_api_key(&self, credential: &str) -> Result<(), DirectoryError> {
        let response = self
            .request(
                self.http
                    .patch(self.table_url("gateway_keys"))
                    .query(&[("key", format!("eq.{credential}"))])
                    .json(&json!({ "last_used_at": Utc::now().to_rfc3339() })),
            )
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn list_stores(&self, tenant: &TenantId) -> Result<Vec<KnowledgeStore>, DirectoryError> {
        let rows: Vec<StoreRow> = self
            .fetch_rows(
                "knowledge_stores",
                &[
                    (
                        "select",
                        "id,display_name,handle,document_count".to_string(),
                    ),
                    ("tenant_id", format!("eq.{tenant}")),
                    ("order", "display_name.asc".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_store(
        &self,
        tenant: &TenantId,
        store_id: &str,
    ) -> Result<Option<KnowledgeStore>, DirectoryError> {
        let rows: Vec<StoreRow> = self
            .fetch_rows(
                "knowledge_stores",
                &[
                    (
                        "select",
                        "id,display_name,handle,document_count".to_string(),
                    ),
                    ("tenant_id", format!("eq.{tenant}")),
                    ("id", format!("eq.{store_id}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().map(Into::into))
    }

    async fn list_documents(
        &self,
        tenant: &TenantId,
        store_id: &str,
        limit: usize,
    ) -> Result<Vec<DocumentRecord>, DirectoryError> {
        let rows: Vec<DocumentRow> = self
            .fetch_rows(
                "documents",
                &[
                    (
                        "select",
                        "id,display_name,original_filename,mime_type,store_id,local_path"
                            .to_string(),
                    ),
                    ("tenant_id", format!("eq.{tenant}")),
                    ("store_id", format!("eq.{store_id}")),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_document(
        &self,
        tenant: &TenantId,
        reference: &str,
        store_id: Option<&str>,
    ) -> Result<Option<DocumentRecord>, DirectoryError> {
        let select = (
            "select",
            "id,display_name,original_filename,mime_type,store_id,local_path".to_string(),
        );

        // Exact id first, then exact display name.
        for column in ["id", "display_name"] {
            let mut query = vec![
                select.clone(),
                ("tenant_id", format!("eq.{tenant}")),
                (column, format!("eq.{reference}")),
                ("limit", "1".to_string()),
            ];
            if let Some(store) = store_id {
                query.push(("store_id", format!("eq.{store}")));
            }
            let rows: Vec<DocumentRow> = self.fetch_rows("documents", &query).await?;
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row.into()));
            }
        }
        Ok(None)
    }

    async fn delete_document(
        &self,
        tenant: &TenantId,
        document_id: &str,
    ) -> Result<(), DirectoryError> {
        let response = self
            .request(
                self.http
                    .delete(self.table_url("documents"))
                    .query(&[
                        ("tenant_id", format!("eq.{tenant}")),
                        ("id", format!("eq.{document_id}")),
                    ])
                    // Return deleted rows so a zero-row delete is detectable.
                    .header("Prefer", "return=representation"),
            )
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let deleted: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;
        if deleted.is_empty() {
            return Err(DirectoryError::Status {
                status: 404,
                body: format!("document not found: {document_id}"),
            });
        }
        Ok(())
    }

    async fn get_settings(&self, tenant: &TenantId) -> Result<TenantSettings, DirectoryError> {
        let rows: Vec<SettingsRow> = self
            .fetch_rows(
                "tenant_settings",
                &[
                    ("select", "active_store_id".to_string()),
                    ("tenant_id", format!("eq.{tenant}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| TenantSettings {
                active_store_id: row.active_store_id,
            })
            .unwrap_or_default())
    }

    async fn set_active_store(
        &self,
        tenant: &TenantId,
        store_id: &str,
    ) -> Result<(), DirectoryError> {
        let response = self
            .request(
                self.http
                    .post(self.table_url("tenant_settings"))
                    .header("Prefer", "resolution=merge-duplicates")
                    .json(&json!({
                        "tenant_id": tenant.as_str(),
                        "active_store_id": store_id,
                    })),
            )
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

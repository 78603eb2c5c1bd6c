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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque tenant identity. Scopes every data access made by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A named collection of ingested documents, searchable as a unit by the
/// upstream generative-search provider.
///
/// The authoritative copy lives in the tenant directory; the gateway never
/// caches these beyond single-request scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeStore {
    /// Canonical store id (the directory's primary key).
    pub id: String,
    /// Human-facing name, used for fuzzy resolution.
    pub display_name: String,
    /// Upstream resource handle passed to the search provider.
    pub handle: String,
    /// Number of ingested documents, as recorded by the directory.
    #[serde(default)]
    pub document_count: u64,
}

/// A tenant-owned document record. Ownership is re-verified against the
/// tenant id before any mutating or data-returning operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub display_name: String,
    pub original_filename: String,
    pub mime_type: String,
    pub store_id: String,
    /// Server-local storage path, if the document body is retained locally.
    #[serde(default)]
    pub local_path: Option<String>,
}

/// Per-tenant gateway settings. Whole-value replaced on every write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    /// Canonical id of the tenant's active knowledge store, if one is set.
    pub active_store_id: Option<String>,
}

/// Role of a conversation turn sent to the upstream search provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

/// One prior conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            text: text.into(),
        }
    }
}

/// Structured source attribution returned alongside generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Source title (document display name or page title).
    pub title: String,
    /// Source identifier: a document handle or an external URL.
    pub locator: Option<String>,
}

impl Citation {
    /// Key used for de-duplication: the locator when present, otherwise
    /// the title.
    pub fn dedup_key(&self) -> &str {
        self.locator.as_deref().unwrap_or(&self.title)
    }
}

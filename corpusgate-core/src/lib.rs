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

//! Core domain types shared across the Corpusgate workspace.
//!
//! The gateway crate depends on these types for everything that crosses a
//! component boundary: tenant identity, knowledge stores, document records,
//! per-tenant settings, conversation turns, and the error taxonomy for the
//! tenant directory and the upstream search provider.

pub mod error;
pub mod types;

pub use error::{DirectoryError, UpstreamError};
pub use types::{
    ChatTurn, Citation, DocumentRecord, KnowledgeStore, TenantId, TenantSettings, TurnRole,
};

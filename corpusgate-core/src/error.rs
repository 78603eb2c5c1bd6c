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

//! Error taxonomy for the gateway's two external dependencies: the tenant
//! directory (authoritative store) and the upstream generative-search API.
//!
//! Tool handlers convert these into in-band error text; they never cross
//! the protocol boundary as structural errors.

use thiserror::Error;

/// Failure talking to the tenant directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Transport(String),

    #[error("directory returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode directory response: {0}")]
    Decode(String),
}

/// Failure talking to the upstream generative-search provider.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("upstream rate limit exceeded{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("upstream resource not found: {0}")]
    NotFound(String),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// True when retrying later could succeed (rate limits, transport
    /// faults, 5xx responses).
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::RateLimited { .. } | UpstreamError::Transport(_) => true,
            UpstreamError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(" (retry after {secs}s)"),
        None => String::new(),
    }
}

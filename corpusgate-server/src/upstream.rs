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

//! Upstream Search Client.
//!
//! Wraps the external generative-search API: submits a query plus a list of
//! knowledge-store handles (retrieval spans all of them in one round trip)
//! and returns generated text plus structured grounding references.
//!
//! Citation rendering is in-band and mandatory: downstream agent clients
//! only see the text field, so de-duplicated sources are appended to it as
//! a human-readable `Sources:` block.

use async_trait::async_trait;
use corpusgate_core::{ChatTurn, Citation, TurnRole, UpstreamError};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

/// A single generative-search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Upstream store handles. Retrieval spans every handle in one call.
    pub store_handles: Vec<String>,
    pub model: String,
    pub system_prompt: Option<String>,
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchReply {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl SearchReply {
    /// Generated text with the de-duplicated `Sources:` block appended.
    pub fn rendered(&self) -> String {
        render_with_sources(&self.text, &self.citations)
    }
}

/// Seam between tool handlers and the hosted search provider.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<SearchReply, UpstreamError>;

    /// Delete one ingested document from a store. `NotFound` is a real
    /// error here; callers that want delete-idempotence handle it.
    async fn delete_document(
        &self,
        store_handle: &str,
        document_id: &str,
    ) -> Result<(), UpstreamError>;
}

/// Production client for the hosted generative-search API.
pub struct GenerativeSearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GenerativeSearchClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn build_body(request: &SearchRequest) -> Value {
        // Prior turns first, then the new user turn.
        let mut contents: Vec<Value> = request
            .history
            .iter()
            .map(|turn| {
                json!({
                    "role": match turn.role {
                        TurnRole::User => "user",
                        TurnRole::Model => "model",
                    },
                    "parts": [{ "text": turn.text }],
                })
            })
            .collect();
        contents.push(json!({
            "role": "user",
            "parts": [{ "text": request.query }],
        }));

        let mut body = json!({
            "contents": contents,
            "tools": [{
                "fileSearch": { "fileSearchStoreNames": request.store_handles }
            }],
        });
        if let Some(prompt) = &request.system_prompt {
            body["systemInstruction"] = json!({ "parts": [{ "text": prompt }] });
        }
        body
    }
}

#[async_trait]
impl SearchBackend for GenerativeSearchClient {
    async fn search(&self, request: SearchRequest) -> Result<SearchReply, UpstreamError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.model
        );
        let body = Self::build_body(&request);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(UpstreamError::RateLimited { retry_after_secs });
        }
        if status.as_u16() == 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::NotFound(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        Ok(parse_reply(&payload))
    }

    async fn delete_document(
        &self,
        store_handle: &str,
        document_id: &str,
    ) -> Result<(), UpstreamError> {
        let url = format!(
            "{}/v1beta/{}/documents/{}",
            self.base_url, store_handle, document_id
        );

        let response = self
            .http
            .delete(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(UpstreamError::NotFound(format!(
                "{store_handle}/documents/{document_id}"
            )));
        }
        if status.as_u16() == 429 {
            return Err(UpstreamError::RateLimited {
                retry_after_secs: None,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Extract generated text and grounding citations from an upstream
/// response. No text is a successful-but-empty result, never an error.
fn parse_reply(payload: &Value) -> SearchReply {
    let candidate = &payload["candidates"][0];

    let text = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "(No response)".to_string());

    let citations = candidate["groundingMetadata"]["groundingChunks"]
        .as_array()
        .map(|chunks| chunks.iter().filter_map(parse_chunk).collect())
        .unwrap_or_default();

    SearchReply { text, citations }
}

fn parse_chunk(chunk: &Value) -> Option<Citation> {
    // Retrieved-document chunks and web chunks carry the same shape under
    // different keys.
    let source = chunk
        .get("retrievedContext")
        .or_else(|| chunk.get("web"))?;
    let title = source["title"].as_str()?.to_string();
    let locator = source["uri"].as_str().map(|s| s.to_string());
    Some(Citation { title, locator })
}

/// Append a human-readable `Sources:` block, de-duplicated by source
/// identifier, to the generated text.
pub fn render_with_sources(text: &str, citations: &[Citation]) -> String {
    if citations.is_empty() {
        return text.to_string();
    }

    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for citation in citations {
        if !seen.insert(citation.dedup_key().to_string()) {
            continue;
        }
        match &citation.locator {
            Some(locator) => lines.push(format!("- {} ({})", citation.title, locator)),
            None => lines.push(format!("- {}", citation.title)),
        }
    }

    format!("{}\n\nSources:\n{}", text, lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reply_joins_text_parts() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] }
            }]
        });
        let reply = parse_reply(&payload);
        assert_eq!(reply.text, "Hello world");
        assert!(reply.citations.is_empty());
    }

    #[test]
    fn parse_reply_without_text_is_empty_success() {
        let payload = json!({ "candidates": [{ "content": { "parts": [] } }] });
        assert_eq!(parse_reply(&payload).text, "(No response)");

        let payload = json!({});
        assert_eq!(parse_reply(&payload).text, "(No response)");
    }

    #[test]
    fn parse_reply_extracts_grounding_chunks() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "answer" }] },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "retrievedContext": { "title": "Handbook", "uri": "documents/h1" } },
                        { "web": { "title": "Example", "uri": "https://example.com" } },
                        { "unknownShape": {} }
                    ]
                }
            }]
        });
        let reply = parse_reply(&payload);
        assert_eq!(reply.citations.len(), 2);
        assert_eq!(reply.citations[0].title, "Handbook");
        assert_eq!(
            reply.citations[1].locator.as_deref(),
            Some("https://example.com")
        );
    }

    #[test]
    fn sources_block_deduplicates_by_identifier() {
        let citations = vec![
            Citation {
                title: "Handbook".into(),
                locator: Some("documents/h1".into()),
            },
            Citation {
                title: "Handbook (copy)".into(),
                locator: Some("documents/h1".into()),
            },
            Citation {
                title: "Other".into(),
                locator: None,
            },
        ];
        let rendered = render_with_sources("answer", &citations);
        assert_eq!(rendered.matches("documents/h1").count(), 1);
        assert!(rendered.contains("Sources:"));
        assert!(rendered.contains("- Other"));
    }

    #[test]
    fn no_citations_means_no_sources_block() {
        assert_eq!(render_with_sources("answer", &[]), "answer");
    }

    #[test]
    fn request_body_places_history_before_new_turn() {
        let request = SearchRequest {
            query: "what changed?".into(),
            store_handles: vec!["stores/a".into(), "stores/b".into()],
            model: "gemini-2.0-flash".into(),
            system_prompt: Some("be brief".into()),
            history: vec![ChatTurn::user("hi"), ChatTurn::model("hello")],
        };
        let body = GenerativeSearchClient::build_body(&request);

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "what changed?");

        // Every store handle rides in the single call.
        let handles = body["tools"][0]["fileSearch"]["fileSearchStoreNames"]
            .as_array()
            .unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
    }
}

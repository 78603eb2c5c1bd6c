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

//! Session Manager.
//!
//! Owns the mapping from live-connection identifier to resolved tenant
//! identity and push transport, and is the sole arbiter of "which tenant is
//! this call for". Sessions are purely in-memory and process-lifetime.
//!
//! Lifecycle per session: registered atomically with its transport
//! (ESTABLISHED), then removed exactly once on close. Close is triggered by
//! the SSE stream dropping, an explicit close, or a failed heartbeat write;
//! all three paths funnel through [`SessionManager::close`], which is
//! idempotent.

use chrono::{DateTime, Utc};
use corpusgate_core::TenantId;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Application-level keepalive interval for every session transport.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Outbound frame capacity per session before pushes apply backpressure.
const OUTBOUND_CAPACITY: usize = 64;

/// Retained closed-session records for diagnostics.
const HISTORY_CAPACITY: usize = 100;

/// One live streaming connection plus its resolved tenant identity.
///
/// The tenant is fixed at creation and immutable for the session's
/// lifetime; tool calls within a session always resolve to it and are
/// never re-authenticated mid-session.
pub struct Session {
    pub id: String,
    pub tenant: Option<TenantId>,
    pub credential: String,
    pub created_at: DateTime<Utc>,
    outbound: mpsc::Sender<String>,
}

impl Session {
    /// Push a serialized protocol frame onto the session's SSE stream.
    /// Fails when the connection is gone.
    pub async fn push(&self, frame: String) -> Result<(), SessionGone> {
        self.outbound.send(frame).await.map_err(|_| SessionGone)
    }
}

/// The session's connection has already closed.
#[derive(Debug)]
pub struct SessionGone;

/// Diagnostic record of a closed session. Not a source of truth.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub tenant: Option<TenantId>,
    pub established_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Live-session summary for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSessionInfo {
    pub session_id: String,
    pub tenant: Option<TenantId>,
    pub established_at: DateTime<Utc>,
}

pub struct SessionManager {
    live: DashMap<String, Arc<Session>>,
    history: Mutex<VecDeque<SessionRecord>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Register a new session. The entry and its transport are created
    /// together; a session never exists in the map without both.
    pub fn register(
        &self,
        tenant: Option<TenantId>,
        credential: String,
    ) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let session = Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            tenant,
            credential,
            created_at: Utc::now(),
            outbound: tx,
        });
        self.live.insert(session.id.clone(), session.clone());
        tracing::info!(
            session_id = %session.id,
            tenant = ?session.tenant,
            "Session established"
        );
        (session, rx)
    }

    /// Look up a live session by its token.
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.live.get(session_id).map(|entry| entry.clone())
    }

    /// Close a session. Idempotent: only the first close removes the entry
    /// and appends a history record; later calls are no-ops.
    pub fn close(&self, session_id: &str) -> bool {
        let Some((_, session)) = self.live.remove(session_id) else {
            return false;
        };

        let record = SessionRecord {
            session_id: session.id.clone(),
            tenant: session.tenant.clone(),
            established_at: session.created_at,
            closed_at: Utc::now(),
        };

        let mut history = self.history.lock();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(record);

        tracing::info!(session_id = %session_id, "Session closed");
        true
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_sessions(&self) -> Vec<LiveSessionInfo> {
        self.live
            .iter()
            .map(|entry| LiveSessionInfo {
                session_id: entry.id.clone(),
                tenant: entry.tenant.clone(),
                established_at: entry.created_at,
            })
            .collect()
    }

    pub fn recent_history(&self) -> Vec<SessionRecord> {
        self.history.lock().iter().cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_lookup() {
        let manager = SessionManager::new();
        let (session, _rx) = manager.register(Some(TenantId::new("t-1")), "cg_key".into());

        let found = manager.get(&session.id).expect("session should be live");
        assert_eq!(found.tenant, Some(TenantId::new("t-1")));
        assert_eq!(manager.live_count(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let manager = SessionManager::new();
        let (session, _rx) = manager.register(None, "cg_key".into());

        assert!(manager.close(&session.id));
        assert!(!manager.close(&session.id));
        assert!(!manager.close(&session.id));

        // One history entry, no duplicates.
        assert_eq!(manager.recent_history().len(), 1);
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn closed_session_is_not_found() {
        let manager = SessionManager::new();
        let (session, _rx) = manager.register(None, "cg_key".into());
        manager.close(&session.id);
        assert!(manager.get(&session.id).is_none());
    }

    #[tokio::test]
    async fn push_fails_after_receiver_drops() {
        let manager = SessionManager::new();
        let (session, rx) = manager.register(None, "cg_key".into());
        drop(rx);
        assert!(session.push("frame".into()).await.is_err());
    }

    #[tokio::test]
    async fn history_is_bounded_oldest_first_out() {
        let manager = SessionManager::new();
        let mut first_id = None;
        for i in 0..(HISTORY_CAPACITY + 10) {
            let (session, _rx) = manager.register(None, format!("cg_{i}"));
            if i == 0 {
                first_id = Some(session.id.clone());
            }
            manager.close(&session.id);
        }
        let history = manager.recent_history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert!(history.iter().all(|r| Some(&r.session_id) != first_id.as_ref()));
    }

    #[tokio::test]
    async fn reconnect_gets_a_fresh_session_id() {
        let manager = SessionManager::new();
        let (old, _rx) = manager.register(Some(TenantId::new("t-1")), "cg_key".into());
        let old_id = old.id.clone();
        manager.close(&old_id);

        let (new, _rx2) = manager.register(Some(TenantId::new("t-1")), "cg_key".into());
        assert_ne!(new.id, old_id);
        assert!(manager.get(&old_id).is_none());
    }
}

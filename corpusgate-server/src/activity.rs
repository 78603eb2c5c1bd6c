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

//! Bounded in-memory activity log surfaced on the status endpoint.
//! Observability only; dropping entries is always acceptable.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    SessionOpened,
    SessionClosed,
    ToolInvoked,
    ToolFailed,
    AuthRejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub kind: ActivityKind,
    pub message: String,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<ActivityEntry>,
    tool_counters: HashMap<String, u64>,
}

#[derive(Default)]
pub struct ActivityLog {
    inner: Mutex<Inner>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: ActivityKind, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        if inner.entries.len() == LOG_CAPACITY {
            inner.entries.pop_front();
        }
        inner.entries.push_back(ActivityEntry {
            at: Utc::now(),
            kind,
            message: message.into(),
        });
    }

    /// Bump the invocation counter for one tool.
    pub fn count_tool(&self, tool: &str) {
        *self
            .inner
            .lock()
            .tool_counters
            .entry(tool.to_string())
            .or_insert(0) += 1;
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    pub fn tool_counters(&self) -> HashMap<String, u64> {
        self.inner.lock().tool_counters.clone()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_bounded() {
        let log = ActivityLog::new();
        for i in 0..(LOG_CAPACITY + 25) {
            log.record(ActivityKind::ToolInvoked, format!("call {i}"));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), LOG_CAPACITY);
        // Oldest entries were evicted first.
        assert_eq!(entries[0].message, "call 25");
    }

    #[test]
    fn clear_empties_entries_but_keeps_counters() {
        let log = ActivityLog::new();
        log.record(ActivityKind::SessionOpened, "s-1");
        log.count_tool("chat");
        log.clear();
        assert!(log.entries().is_empty());
        assert_eq!(log.tool_counters().get("chat"), Some(&1));
    }
}

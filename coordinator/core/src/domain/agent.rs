// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Record
//!
//! One agent record per running process. The identifier is the configured agent
//! name and is stable for the process lifetime; it doubles as the record's
//! primary key in every backend.
//!
//! Lifecycle: `is_exploring` goes `false -> true` when a walk begins
//! (`start_time` set, `end_time` cleared) and `true -> false` when it ends
//! (`end_time` set). Only the owning agent writes its timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Agent identifier (the configured agent name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    #[serde(default)]
    pub is_exploring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(id: AgentId) -> Self {
        Self {
            id,
            is_exploring: false,
            start_time: None,
            end_time: None,
        }
    }

    /// Exploration duration in seconds, when both timestamps are present.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &AgentPatch) {
        if let Some(exploring) = patch.is_exploring {
            self.is_exploring = exploring;
        }
        if let Some(start) = patch.start_time {
            self.start_time = start;
        }
        if let Some(end) = patch.end_time {
            self.end_time = end;
        }
    }
}

/// Partial update of an agent record.
///
/// `None` leaves a field untouched; `Some(None)` clears a timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentPatch {
    pub is_exploring: Option<bool>,
    pub start_time: Option<Option<DateTime<Utc>>>,
    pub end_time: Option<Option<DateTime<Utc>>>,
}

impl AgentPatch {
    /// `Idle -> Exploring`: set the start time and clear any previous end time.
    pub fn begin(now: DateTime<Utc>) -> Self {
        Self {
            is_exploring: Some(true),
            start_time: Some(Some(now)),
            end_time: Some(None),
        }
    }

    /// `Exploring -> Waiting`: record the end time.
    pub fn finish(now: DateTime<Utc>) -> Self {
        Self {
            is_exploring: Some(false),
            start_time: None,
            end_time: Some(Some(now)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_begin_clears_end_time() {
        let t0 = Utc::now();
        let mut agent = Agent::new(AgentId::new("A"));
        agent.end_time = Some(t0);

        agent.apply(&AgentPatch::begin(t0));
        assert!(agent.is_exploring);
        assert_eq!(agent.start_time, Some(t0));
        assert_eq!(agent.end_time, None);
    }

    #[test]
    fn test_duration() {
        let t0 = Utc::now();
        let mut agent = Agent::new(AgentId::new("A"));
        assert_eq!(agent.duration_secs(), None);

        agent.apply(&AgentPatch::begin(t0));
        agent.apply(&AgentPatch::finish(t0 + Duration::milliseconds(2500)));
        assert!(!agent.is_exploring);
        assert_eq!(agent.duration_secs(), Some(2.5));
    }
}

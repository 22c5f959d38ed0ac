// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Change Events
//!
//! Store-level mutations surfaced to the outside world. Adapters produce a
//! [`ChangeStream`]; the notification bridge drains it into a [`PublishSink`].
//! Delivery is best effort: nothing in the core waits for an acknowledgment.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A cell record was created or updated.
    CellUpdate,
    /// An agent record was created or updated.
    AgentUpdate,
    /// Raw change-feed entry the adapter could not attribute to a record type.
    DbChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }

    /// Classify a raw document by its shape: cells carry `x`/`y`, agents carry
    /// `is_exploring` or a `type: "agent"` marker.
    pub fn from_document(doc: serde_json::Value) -> Self {
        let kind = if doc.get("type").and_then(|t| t.as_str()) == Some("agent")
            || doc.get("is_exploring").is_some()
        {
            ChangeKind::AgentUpdate
        } else if doc.get("x").is_some() && doc.get("y").is_some() {
            ChangeKind::CellUpdate
        } else {
            ChangeKind::DbChange
        };
        Self { kind, payload: doc }
    }
}

/// Live feed of changes from one store handle.
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

/// External publish boundary. Fire-and-forget.
pub trait PublishSink: Send + Sync {
    fn publish(&self, event: ChangeEvent);
}

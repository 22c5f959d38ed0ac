// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! CouchDB wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{Agent, AgentId};
use crate::domain::cell::{Cell, CellKey};

pub const CELL_TYPE: &str = "cell";
pub const AGENT_TYPE: &str = "agent";

fn cell_type() -> String {
    CELL_TYPE.to_string()
}

fn agent_type() -> String {
    AGENT_TYPE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type", default = "cell_type")]
    pub doc_type: String,
    pub x: u32,
    pub y: u32,
    #[serde(default)]
    pub claim_count: u64,
    #[serde(default)]
    pub claimants: Vec<String>,
}

impl CellDocument {
    pub fn from_cell(cell: &Cell) -> Self {
        Self {
            id: cell.key().0,
            rev: None,
            doc_type: cell_type(),
            x: cell.x,
            y: cell.y,
            claim_count: cell.claim_count,
            claimants: cell.claimants.clone(),
        }
    }

    pub fn to_cell(&self) -> Cell {
        Cell {
            x: self.x,
            y: self.y,
            claim_count: self.claim_count,
            claimants: self.claimants.clone(),
        }
    }

    pub fn key(&self) -> CellKey {
        CellKey(self.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type", default = "agent_type")]
    pub doc_type: String,
    pub name: String,
    #[serde(default)]
    pub is_exploring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl AgentDocument {
    pub fn new(id: &AgentId) -> Self {
        Self {
            id: id.0.clone(),
            rev: None,
            doc_type: agent_type(),
            name: id.0.clone(),
            is_exploring: false,
            start_time: None,
            end_time: None,
        }
    }

    pub fn to_agent(&self) -> Agent {
        Agent {
            id: AgentId(self.name.clone()),
            is_exploring: self.is_exploring,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }

    /// Overwrite the mutable fields from `agent`, keeping `_id`/`_rev`.
    pub fn absorb(&mut self, agent: &Agent) {
        self.is_exploring = agent.is_exploring;
        self.start_time = agent.start_time;
        self.end_time = agent.end_time;
    }
}

#[derive(Debug, Deserialize)]
pub struct ViewResponse<K, V> {
    #[serde(default)]
    pub total_rows: Option<u64>,
    #[serde(default = "Vec::new")]
    pub rows: Vec<ViewRow<K, V>>,
}

#[derive(Debug, Deserialize)]
pub struct ViewRow<K, V> {
    #[serde(default)]
    pub id: Option<String>,
    pub key: K,
    pub value: V,
    #[serde(default)]
    pub doc: Option<serde_json::Value>,
}

/// Value emitted by `conflicts/by_conflicting_cells`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConflictValue {
    pub current: CellDocument,
    #[serde(default)]
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkDocResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PutResponse {
    #[serde(default)]
    pub rev: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
    pub last_seq: serde_json::Value,
}

/// Response body of the `reserve_cell` update handler.
#[derive(Debug, Deserialize)]
pub struct ReserveResponse {
    #[serde(default)]
    pub doc: Option<CellDocument>,
    #[serde(default)]
    pub error: Option<String>,
}

/// CouchDB sequences are opaque strings in 2.x+ and integers in 1.x.
pub fn seq_to_string(seq: &serde_json::Value) -> String {
    match seq {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_document_wire_shape() {
        let doc = CellDocument::from_cell(&Cell {
            x: 2,
            y: 3,
            claim_count: 1,
            claimants: vec!["A".into()],
        });
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["_id"], "2-3");
        assert_eq!(value["type"], "cell");
        assert!(value.get("_rev").is_none());
    }

    #[test]
    fn test_conflict_value_parses() {
        let value: ConflictValue = serde_json::from_value(json!({
            "current": {"_id": "2-2", "_rev": "2-a", "x": 2, "y": 2, "claim_count": 1, "claimants": ["A"]},
            "conflicts": ["2-b", "2-c"]
        }))
        .unwrap();
        assert_eq!(value.current.rev.as_deref(), Some("2-a"));
        assert_eq!(value.conflicts.len(), 2);
    }

    #[test]
    fn test_seq_to_string() {
        assert_eq!(seq_to_string(&json!("12-abc")), "12-abc");
        assert_eq!(seq_to_string(&json!(42)), "42");
    }
}

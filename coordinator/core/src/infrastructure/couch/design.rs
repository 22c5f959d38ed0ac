// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Design documents uploaded by `CouchGridStore::ensure_setup`.
//!
//! | Design doc | Function | Purpose |
//! |------------|----------|---------|
//! | `cell_views` | `by_cells` | key `[x, y]`, value `claim_count` |
//! | `cell_updates` | `reserve_cell` | create-or-increment a cell inside the store |
//! | `conflicts` | `by_conflicting_cells` | `{current, conflicts}` per conflicted cell |
//! | `agent_views` | `by_name`, `count_by_agent` | agent lookup, tiles per claimant |

use serde_json::{json, Value};

pub const CELL_VIEWS: &str = "cell_views";
pub const CELL_UPDATES: &str = "cell_updates";
pub const CONFLICTS: &str = "conflicts";
pub const AGENT_VIEWS: &str = "agent_views";

pub const BY_CELLS: &str = "by_cells";
pub const RESERVE_CELL: &str = "reserve_cell";
pub const BY_CONFLICTING_CELLS: &str = "by_conflicting_cells";
pub const BY_NAME: &str = "by_name";
pub const COUNT_BY_AGENT: &str = "count_by_agent";

const RESERVE_CELL_JS: &str = r#"function (doc, req) {
  var body = {};
  try { body = JSON.parse(req.body || '{}'); } catch (e) {}
  if (!body.agent) {
    return [null, JSON.stringify({ error: 'missing agent' })];
  }
  if (!doc) {
    var parts = req.id.split('-');
    doc = { _id: req.id, type: 'cell', x: parseInt(parts[0], 10), y: parseInt(parts[1], 10), claim_count: 0, claimants: [] };
  }
  doc.claim_count = (doc.claim_count || 0) + 1;
  doc.claimants = doc.claimants || [];
  if (doc.claimants.indexOf(body.agent) === -1) {
    doc.claimants.push(body.agent);
  }
  return [doc, JSON.stringify({ doc: doc })];
}"#;

pub fn design_documents() -> Vec<Value> {
    vec![
        json!({
            "_id": format!("_design/{}", CELL_VIEWS),
            "language": "javascript",
            "views": {
                BY_CELLS: {
                    "map": "function (doc) { if (doc.type === 'cell') { emit([doc.x, doc.y], doc.claim_count || 0); } }"
                }
            }
        }),
        json!({
            "_id": format!("_design/{}", CELL_UPDATES),
            "language": "javascript",
            "updates": { RESERVE_CELL: RESERVE_CELL_JS }
        }),
        json!({
            "_id": format!("_design/{}", CONFLICTS),
            "language": "javascript",
            "views": {
                BY_CONFLICTING_CELLS: {
                    "map": "function (doc) { if (doc.type === 'cell' && doc._conflicts) { var current = JSON.parse(JSON.stringify(doc)); delete current._conflicts; emit(doc._id, { current: current, conflicts: doc._conflicts }); } }"
                }
            }
        }),
        json!({
            "_id": format!("_design/{}", AGENT_VIEWS),
            "language": "javascript",
            "views": {
                BY_NAME: {
                    "map": "function (doc) { if (doc.type === 'agent') { emit(doc.name, null); } }"
                },
                COUNT_BY_AGENT: {
                    "map": "function (doc) { if (doc.type === 'cell' && doc.claim_count > 0) { (doc.claimants || []).forEach(function (a) { emit(a, 1); }); } }",
                    "reduce": "_count"
                }
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_design_documents_have_ids() {
        let docs = design_documents();
        assert_eq!(docs.len(), 4);
        assert!(docs.iter().all(|d| d["_id"].as_str().unwrap().starts_with("_design/")));
        assert!(docs[1]["updates"][RESERVE_CELL].is_string());
    }
}

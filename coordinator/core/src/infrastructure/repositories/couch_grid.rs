// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # CouchDB Grid Store
//!
//! Eventual-consistency adapter. Independent writers (replicated CouchDB
//! nodes) may diverge; divergent cell revisions are merged later by
//! `application::conflict_resolver` through this type's [`ConflictStore`] impl.
//!
//! - Claims go through the `cell_updates/reserve_cell` update handler, so the
//!   create-or-increment runs inside the store. A response without a `doc`
//!   is a rejected claim (`Ok(None)`).
//! - Cells are keyed `"{x}-{y}"`; agents are keyed by agent id.
//! - Agent updates are read-modify-write on `_rev`, retried once on 409.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::domain::agent::{Agent, AgentId, AgentPatch};
use crate::domain::cell::{choose_uniform, Cell, CellKey, GridBounds};
use crate::domain::conflict::{CellConflict, ConflictStore};
use crate::domain::events::ChangeStream;
use crate::domain::repository::{GridStore, StoreError};
use crate::infrastructure::couch::design::{
    self, AGENT_VIEWS, BY_CELLS, BY_CONFLICTING_CELLS, BY_NAME, CELL_UPDATES, CELL_VIEWS, CONFLICTS,
    COUNT_BY_AGENT, RESERVE_CELL,
};
use crate::infrastructure::couch::types::{
    AgentDocument, CellDocument, ConflictValue, ReserveResponse, ViewResponse,
};
use crate::infrastructure::couch::CouchClient;

#[derive(Clone)]
pub struct CouchGridStore {
    client: CouchClient,
    bounds: GridBounds,
}

impl CouchGridStore {
    pub fn new(client: CouchClient, bounds: GridBounds) -> Self {
        Self { client, bounds }
    }

    pub fn client(&self) -> &CouchClient {
        &self.client
    }

    /// Create the database and upload all design documents.
    pub async fn ensure_setup(&self) -> Result<(), StoreError> {
        self.client.ensure_database().await?;
        for doc in design::design_documents() {
            self.client.upsert_design_doc(&doc).await?;
        }
        info!(db = %self.client.db_name(), "CouchDB initialized");
        Ok(())
    }

    /// Bulk-create a zero-claim document for every coordinate that has none.
    /// Returns the number of documents created.
    pub async fn init_grid(&self) -> Result<u64, StoreError> {
        let existing: HashSet<(u32, u32)> = self
            .cell_rows(&[])
            .await?
            .into_iter()
            .map(|(x, y, _)| (x, y))
            .collect();

        let docs: Vec<Value> = self
            .bounds
            .all_coordinates()
            .filter(|c| !existing.contains(c))
            .map(|(x, y)| serde_json::to_value(CellDocument::from_cell(&Cell::undiscovered(x, y))))
            .collect::<Result<_, _>>()?;

        let results = self.client.bulk_docs(&docs).await?;
        let created = results.iter().filter(|r| r.error.is_none()).count() as u64;
        info!(created, "Grid initialized");
        Ok(created)
    }

    /// Live change feed of the whole database.
    pub async fn watch(&self) -> Result<ChangeStream, StoreError> {
        self.client.changes_continuous().await
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.client.ping().await
    }

    /// `(x, y, claim_count)` for every cell document, optionally restricted by view params.
    async fn cell_rows(&self, params: &[(&str, String)]) -> Result<Vec<(u32, u32, u64)>, StoreError> {
        let view: ViewResponse<(u32, u32), u64> =
            self.client.query_view(CELL_VIEWS, BY_CELLS, params).await?;
        Ok(view
            .rows
            .into_iter()
            .map(|row| (row.key.0, row.key.1, row.value))
            .collect())
    }

    async fn cell_documents(&self) -> Result<Vec<CellDocument>, StoreError> {
        let view: ViewResponse<Value, Value> = self
            .client
            .query_view(CELL_VIEWS, BY_CELLS, &[("include_docs", "true".to_string())])
            .await?;
        view.rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
            .collect()
    }

    async fn try_update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<Agent, StoreError> {
        let mut doc = self
            .client
            .get_doc::<AgentDocument>(id.as_str())
            .await?
            .unwrap_or_else(|| AgentDocument::new(id));

        let mut agent = doc.to_agent();
        agent.apply(patch);
        doc.absorb(&agent);

        self.client.put_doc(id.as_str(), &doc).await?;
        Ok(agent)
    }
}

#[async_trait]
impl GridStore for CouchGridStore {
    async fn count_cells(&self) -> Result<u64, StoreError> {
        let view: ViewResponse<Value, Value> = self
            .client
            .query_view(CELL_VIEWS, BY_CELLS, &[("limit", "0".to_string())])
            .await?;
        Ok(view.total_rows.unwrap_or(0))
    }

    async fn find_all_cells(&self) -> Result<Vec<Cell>, StoreError> {
        Ok(self.cell_documents().await?.iter().map(CellDocument::to_cell).collect())
    }

    async fn find_all_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let view: ViewResponse<Value, Value> = self
            .client
            .query_view(AGENT_VIEWS, BY_NAME, &[("include_docs", "true".to_string())])
            .await?;
        view.rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                serde_json::from_value::<AgentDocument>(doc)
                    .map(|d| d.to_agent())
                    .map_err(StoreError::from)
            })
            .collect()
    }

    async fn claim_cell(&self, x: u32, y: u32, agent_id: &AgentId) -> Result<Option<Cell>, StoreError> {
        let key = CellKey::new(x, y);
        let body = self
            .client
            .call_update_handler(CELL_UPDATES, RESERVE_CELL, key.as_str(), &json!({ "agent": agent_id.as_str() }))
            .await?;
        let response: ReserveResponse = serde_json::from_value(body)?;

        match response.doc {
            Some(doc) => Ok(Some(doc.to_cell())),
            None => {
                debug!(cell = %key, reason = ?response.error, "Claim rejected by update handler");
                Ok(None)
            }
        }
    }

    async fn pick_undiscovered_cell(&self) -> Result<Option<Cell>, StoreError> {
        let discovered: HashSet<(u32, u32)> = self
            .cell_rows(&[])
            .await?
            .into_iter()
            .filter(|(_, _, count)| *count > 0)
            .map(|(x, y, _)| (x, y))
            .collect();
        let candidates = self.bounds.undiscovered(&discovered);
        Ok(choose_uniform(&candidates).map(|(x, y)| Cell::undiscovered(x, y)))
    }

    async fn undiscovered_neighbors(&self, x: u32, y: u32) -> Result<Vec<Cell>, StoreError> {
        let last = self.bounds.size.saturating_sub(1);
        let start = json!([x.saturating_sub(1), y.saturating_sub(1)]).to_string();
        let end = json!([(x + 1).min(last), (y + 1).min(last)]).to_string();
        let discovered: HashSet<(u32, u32)> = self
            .cell_rows(&[("startkey", start), ("endkey", end)])
            .await?
            .into_iter()
            .filter(|(_, _, count)| *count > 0)
            .map(|(cx, cy, _)| (cx, cy))
            .collect();
        Ok(self.bounds.undiscovered_neighbors(x, y, &discovered))
    }

    async fn reset_grid(&self) -> Result<u64, StoreError> {
        let tombstones: Vec<Value> = self
            .cell_documents()
            .await?
            .into_iter()
            .map(|doc| json!({ "_id": doc.id, "_rev": doc.rev, "_deleted": true }))
            .collect();
        let results = self.client.bulk_docs(&tombstones).await?;
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        if failed > 0 {
            warn!(failed, "Some cell documents could not be deleted");
        }
        Ok(tombstones.len() as u64)
    }

    async fn update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<Option<Agent>, StoreError> {
        match self.try_update_agent(id, patch).await {
            Err(StoreError::Conflict(reason)) => {
                debug!(agent = %id, %reason, "Agent update conflicted, retrying once");
                self.try_update_agent(id, patch).await.map(Some)
            }
            other => other.map(Some),
        }
    }

    async fn claim_counts_by_agent(&self) -> Result<HashMap<String, u64>, StoreError> {
        let view: ViewResponse<String, u64> = self
            .client
            .query_view(AGENT_VIEWS, COUNT_BY_AGENT, &[("group", "true".to_string())])
            .await?;
        Ok(view.rows.into_iter().map(|row| (row.key, row.value)).collect())
    }

    fn database_name(&self) -> String {
        self.client.db_name()
    }
}

#[async_trait]
impl ConflictStore for CouchGridStore {
    async fn wait_for_conflict_changes(&self, since: Option<String>) -> Result<String, StoreError> {
        let filter = format!("{}/{}", CONFLICTS, BY_CONFLICTING_CELLS);
        let changes = self.client.changes_longpoll(since.as_deref(), &filter).await?;
        debug!(changes = changes.results.len(), "[CouchDB] Conflict feed woke");
        Ok(CouchClient::last_seq(&changes))
    }

    async fn conflicting_cells(&self) -> Result<Vec<CellConflict>, StoreError> {
        let view: ViewResponse<Value, ConflictValue> = self
            .client
            .query_view(CONFLICTS, BY_CONFLICTING_CELLS, &[])
            .await?;
        Ok(view
            .rows
            .into_iter()
            .filter(|row| !row.value.conflicts.is_empty())
            .map(|row| CellConflict {
                key: row.value.current.key(),
                current_rev: row.value.current.rev.clone().unwrap_or_default(),
                current: row.value.current.to_cell(),
                conflicting_revs: row.value.conflicts,
            })
            .collect())
    }

    async fn load_revisions(&self, key: &CellKey, revs: &[String]) -> Result<Vec<Cell>, StoreError> {
        let fetches = revs
            .iter()
            .map(|rev| self.client.get_revision::<CellDocument>(key.as_str(), rev));
        let docs = futures::future::try_join_all(fetches).await?;
        Ok(docs.iter().map(CellDocument::to_cell).collect())
    }

    async fn write_merged(&self, conflict: &CellConflict, merged: &Cell) -> Result<(), StoreError> {
        let mut doc = CellDocument::from_cell(merged);
        doc.rev = Some(conflict.current_rev.clone());
        self.client.put_doc(conflict.key.as_str(), &doc).await?;
        Ok(())
    }

    async fn tombstone_revisions(&self, key: &CellKey, revs: &[String]) -> Result<(), StoreError> {
        let docs: Vec<Value> = revs
            .iter()
            .map(|rev| json!({ "_id": key.as_str(), "_rev": rev, "_deleted": true }))
            .collect();
        let results = self.client.bulk_docs(&docs).await?;
        if let Some(failed) = results.iter().find(|r| r.error.is_some()) {
            return Err(StoreError::Conflict(format!(
                "tombstone of {} failed: {}",
                key,
                failed.reason.clone().unwrap_or_default()
            )));
        }
        Ok(())
    }
}

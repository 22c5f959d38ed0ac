// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Grid Store Implementations
//!
//! Infrastructure adapters for the [`GridStore`] / [`ReplicaStore`] contracts
//! defined in the domain layer.
//!
//! # Available Implementations
//!
//! - **InMemoryGridStore** - Thread-safe HashMap-backed store for development
//!   and tests. Also a [`ReplicaStore`], so failover can be exercised without
//!   a database.
//! - **PostgresGridStore** - One PostgreSQL handle (primary cluster or
//!   standalone instance) with an atomic upsert-increment claim.
//! - **FailoverGridStore** - Strong-consistency adapter: routes every call to
//!   whichever PostgreSQL handle is active.
//! - **CouchGridStore** - Eventual-consistency adapter over the CouchDB REST API.
//!
//! # Design Principles
//!
//! 1. **Create on first claim**: an absent cell record is an undiscovered cell
//! 2. **No retries**: errors are returned as [`StoreError`]; callers decide
//! 3. **Error Mapping**: driver errors are mapped through `From` impls

pub mod couch_grid;
pub mod failover;
pub mod postgres_grid;

pub use couch_grid::CouchGridStore;
pub use failover::{ActiveBackend, BackendConnector, BackendMode, FailoverGridStore};
pub use postgres_grid::PostgresGridStore;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::domain::agent::{Agent, AgentId, AgentPatch};
use crate::domain::cell::{choose_uniform, Cell, CellKey, GridBounds};
use crate::domain::events::{ChangeEvent, ChangeKind, ChangeStream};
use crate::domain::repository::{GridStore, ReplicaStore, StoreError};

#[derive(Default)]
struct GridState {
    cells: HashMap<CellKey, Cell>,
    agents: HashMap<AgentId, Agent>,
}

impl GridState {
    fn discovered(&self) -> HashSet<(u32, u32)> {
        self.cells
            .values()
            .filter(|c| c.is_discovered())
            .map(|c| (c.x, c.y))
            .collect()
    }
}

#[derive(Clone)]
pub struct InMemoryGridStore {
    name: String,
    bounds: GridBounds,
    state: Arc<RwLock<GridState>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl InMemoryGridStore {
    pub fn new(bounds: GridBounds) -> Self {
        Self::named("memory", bounds)
    }

    pub fn named(name: impl Into<String>, bounds: GridBounds) -> Self {
        let (changes, _) = broadcast::channel(1000);
        Self {
            name: name.into(),
            bounds,
            state: Arc::new(RwLock::new(GridState::default())),
            changes,
        }
    }

    /// Insert or overwrite a cell record directly. Test and seeding helper.
    pub fn put_cell(&self, cell: Cell) {
        self.state.write().cells.insert(cell.key(), cell);
    }

    pub fn get_cell(&self, x: u32, y: u32) -> Option<Cell> {
        self.state.read().cells.get(&CellKey::new(x, y)).cloned()
    }

    pub fn get_agent(&self, id: &AgentId) -> Option<Agent> {
        self.state.read().agents.get(id).cloned()
    }

    fn emit(&self, kind: ChangeKind, payload: serde_json::Value) {
        // No subscribers is fine
        let _ = self.changes.send(ChangeEvent::new(kind, payload));
    }
}

#[async_trait]
impl GridStore for InMemoryGridStore {
    async fn count_cells(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().cells.len() as u64)
    }

    async fn find_all_cells(&self) -> Result<Vec<Cell>, StoreError> {
        let mut cells: Vec<Cell> = self.state.read().cells.values().cloned().collect();
        cells.sort_by_key(|c| (c.x, c.y));
        Ok(cells)
    }

    async fn find_all_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let mut agents: Vec<Agent> = self.state.read().agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn claim_cell(&self, x: u32, y: u32, agent_id: &AgentId) -> Result<Option<Cell>, StoreError> {
        let claimed = {
            let mut state = self.state.write();
            let cell = state
                .cells
                .entry(CellKey::new(x, y))
                .or_insert_with(|| Cell::undiscovered(x, y));
            cell.apply_claim(agent_id.as_str());
            cell.clone()
        };
        self.emit(ChangeKind::CellUpdate, serde_json::to_value(&claimed)?);
        Ok(Some(claimed))
    }

    async fn pick_undiscovered_cell(&self) -> Result<Option<Cell>, StoreError> {
        let candidates = {
            let state = self.state.read();
            self.bounds.undiscovered(&state.discovered())
        };
        Ok(choose_uniform(&candidates).map(|(x, y)| Cell::undiscovered(x, y)))
    }

    async fn undiscovered_neighbors(&self, x: u32, y: u32) -> Result<Vec<Cell>, StoreError> {
        let state = self.state.read();
        Ok(self.bounds.undiscovered_neighbors(x, y, &state.discovered()))
    }

    async fn reset_grid(&self) -> Result<u64, StoreError> {
        let removed = {
            let mut state = self.state.write();
            let n = state.cells.len() as u64;
            state.cells.clear();
            n
        };
        self.emit(ChangeKind::DbChange, serde_json::json!({ "reset": removed }));
        Ok(removed)
    }

    async fn update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<Option<Agent>, StoreError> {
        let updated = {
            let mut state = self.state.write();
            let agent = state
                .agents
                .entry(id.clone())
                .or_insert_with(|| Agent::new(id.clone()));
            agent.apply(patch);
            agent.clone()
        };
        self.emit(ChangeKind::AgentUpdate, serde_json::to_value(&updated)?);
        Ok(Some(updated))
    }

    fn database_name(&self) -> String {
        self.name.clone()
    }
}

#[async_trait]
impl ReplicaStore for InMemoryGridStore {
    async fn insert_missing_cells(&self, cells: &[Cell]) -> Result<u64, StoreError> {
        let mut state = self.state.write();
        let mut inserted = 0;
        for cell in cells {
            if let std::collections::hash_map::Entry::Vacant(slot) = state.cells.entry(cell.key()) {
                slot.insert(cell.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn replace_all(&self, cells: &[Cell], agents: &[Agent]) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state.cells = cells.iter().map(|c| (c.key(), c.clone())).collect();
        state.agents = agents.iter().map(|a| (a.id.clone(), a.clone())).collect();
        Ok(())
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        let stream = BroadcastStream::new(self.changes.subscribe()).filter_map(|item| item.ok());
        Ok(Box::pin(stream))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

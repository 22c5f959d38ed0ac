// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Failover Grid Store
//!
//! Strong-consistency adapter. Holds two [`ReplicaStore`] handles (primary
//! cluster and standalone instance) and routes every [`GridStore`] call to the
//! active one.
//!
//! The active handle lives in a single [`ActiveBackend`] value behind a lock
//! and is replaced wholesale on a mode switch. A caller that read it before the
//! switch finishes its call on the old handle; nobody sees a mode paired with
//! the other mode's handle.
//!
//! Mode changes are decided by `application::failover_controller`; this type
//! only performs them.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::domain::agent::{Agent, AgentId, AgentPatch};
use crate::domain::cell::{Cell, GridBounds};
use crate::domain::repository::{GridStore, ReplicaStore, StoreError};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::postgres_grid::PostgresGridStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    Primary,
    Standalone,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Primary => f.write_str("primary"),
            BackendMode::Standalone => f.write_str("standalone"),
        }
    }
}

/// The mode and the handle serving it, swapped together.
#[derive(Clone)]
pub struct ActiveBackend {
    pub mode: BackendMode,
    pub store: Arc<dyn ReplicaStore>,
}

/// Opens fresh handles to either side of the pair.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect_primary(&self) -> Result<Arc<dyn ReplicaStore>, StoreError>;
    async fn connect_standalone(&self) -> Result<Arc<dyn ReplicaStore>, StoreError>;
}

pub struct FailoverGridStore {
    primary: RwLock<Arc<dyn ReplicaStore>>,
    standalone: RwLock<Arc<dyn ReplicaStore>>,
    active: RwLock<ActiveBackend>,
    mode_tx: watch::Sender<BackendMode>,
    label: String,
}

impl FailoverGridStore {
    pub fn new(
        primary: Arc<dyn ReplicaStore>,
        standalone: Arc<dyn ReplicaStore>,
        initial_mode: BackendMode,
    ) -> Self {
        let store = match initial_mode {
            BackendMode::Primary => primary.clone(),
            BackendMode::Standalone => standalone.clone(),
        };
        let (mode_tx, _) = watch::channel(initial_mode);
        Self {
            primary: RwLock::new(primary),
            standalone: RwLock::new(standalone),
            active: RwLock::new(ActiveBackend {
                mode: initial_mode,
                store,
            }),
            mode_tx,
            label: "postgres".to_string(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Snapshot of the active mode and handle.
    pub fn active(&self) -> ActiveBackend {
        self.active.read().clone()
    }

    pub fn mode(&self) -> BackendMode {
        self.active.read().mode
    }

    pub fn primary(&self) -> Arc<dyn ReplicaStore> {
        self.primary.read().clone()
    }

    pub fn standalone(&self) -> Arc<dyn ReplicaStore> {
        self.standalone.read().clone()
    }

    /// Receives the new mode after every switch.
    pub fn subscribe_mode(&self) -> watch::Receiver<BackendMode> {
        self.mode_tx.subscribe()
    }

    /// Install a reconnected primary handle. Takes effect immediately if
    /// primary is the active mode.
    pub fn replace_primary(&self, store: Arc<dyn ReplicaStore>) {
        *self.primary.write() = store.clone();
        let mut active = self.active.write();
        if active.mode == BackendMode::Primary {
            *active = ActiveBackend {
                mode: BackendMode::Primary,
                store,
            };
        }
    }

    pub fn replace_standalone(&self, store: Arc<dyn ReplicaStore>) {
        *self.standalone.write() = store.clone();
        let mut active = self.active.write();
        if active.mode == BackendMode::Standalone {
            *active = ActiveBackend {
                mode: BackendMode::Standalone,
                store,
            };
        }
    }

    /// Point live traffic at `mode`'s handle. Returns the previous mode.
    pub fn switch_to(&self, mode: BackendMode) -> BackendMode {
        let store = match mode {
            BackendMode::Primary => self.primary(),
            BackendMode::Standalone => self.standalone(),
        };
        let previous = {
            let mut active = self.active.write();
            let previous = active.mode;
            *active = ActiveBackend { mode, store };
            previous
        };
        if previous != mode {
            info!(from = %previous, to = %mode, "Active backend switched");
            self.mode_tx.send_replace(mode);
        }
        previous
    }
}

#[async_trait]
impl GridStore for FailoverGridStore {
    async fn count_cells(&self) -> Result<u64, StoreError> {
        self.active().store.count_cells().await
    }

    async fn find_all_cells(&self) -> Result<Vec<Cell>, StoreError> {
        self.active().store.find_all_cells().await
    }

    async fn find_all_agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.active().store.find_all_agents().await
    }

    async fn claim_cell(&self, x: u32, y: u32, agent_id: &AgentId) -> Result<Option<Cell>, StoreError> {
        self.active().store.claim_cell(x, y, agent_id).await
    }

    async fn pick_undiscovered_cell(&self) -> Result<Option<Cell>, StoreError> {
        self.active().store.pick_undiscovered_cell().await
    }

    async fn undiscovered_neighbors(&self, x: u32, y: u32) -> Result<Vec<Cell>, StoreError> {
        self.active().store.undiscovered_neighbors(x, y).await
    }

    async fn reset_grid(&self) -> Result<u64, StoreError> {
        self.active().store.reset_grid().await
    }

    async fn update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<Option<Agent>, StoreError> {
        self.active().store.update_agent(id, patch).await
    }

    async fn claim_counts_by_agent(&self) -> Result<HashMap<String, u64>, StoreError> {
        self.active().store.claim_counts_by_agent().await
    }

    fn database_name(&self) -> String {
        self.label.clone()
    }
}

/// Connects the PostgreSQL pair and makes sure both schemas exist.
pub struct PostgresConnector {
    primary_url: String,
    standalone_url: String,
    bounds: GridBounds,
    max_connections: u32,
}

impl PostgresConnector {
    pub fn new(
        primary_url: impl Into<String>,
        standalone_url: impl Into<String>,
        bounds: GridBounds,
        max_connections: u32,
    ) -> Self {
        Self {
            primary_url: primary_url.into(),
            standalone_url: standalone_url.into(),
            bounds,
            max_connections,
        }
    }

    /// Handle that does not touch the network until first use.
    pub fn lazy_primary(&self) -> Result<Arc<dyn ReplicaStore>, StoreError> {
        let db = Database::lazy(&self.primary_url, self.max_connections)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Arc::new(PostgresGridStore::from_database(&db, self.bounds, "primary")))
    }

    async fn open(&self, url: &str, label: &str) -> Result<Arc<dyn ReplicaStore>, StoreError> {
        let db = Database::new(url, self.max_connections)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", label, e)))?;
        let store = PostgresGridStore::from_database(&db, self.bounds, label);
        store.ensure_schema().await?;
        Ok(Arc::new(store))
    }
}

#[async_trait]
impl BackendConnector for PostgresConnector {
    async fn connect_primary(&self) -> Result<Arc<dyn ReplicaStore>, StoreError> {
        self.open(&self.primary_url, "primary").await
    }

    async fn connect_standalone(&self) -> Result<Arc<dyn ReplicaStore>, StoreError> {
        self.open(&self.standalone_url, "standalone").await
    }
}

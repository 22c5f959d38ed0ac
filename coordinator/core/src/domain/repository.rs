// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Grid Store Contracts
//!
//! Persistence contract for cells and agents, implemented by every backend
//! adapter in `crate::infrastructure::repositories`.
//!
//! | Trait | Purpose | Implementations |
//! |-------|---------|----------------|
//! | [`GridStore`] | what agents and stats need | all stores, plus `FailoverGridStore` |
//! | [`ReplicaStore`] | bulk sync + change feed between two handles | `InMemoryGridStore`, `PostgresGridStore` |
//!
//! ## Error policy
//!
//! Every network or storage failure comes back as a [`StoreError`]. The store
//! never retries on its own; the reservation protocol and background loops own
//! that decision.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::agent::{Agent, AgentId, AgentPatch};
use crate::domain::cell::Cell;
use crate::domain::events::ChangeStream;

#[async_trait]
pub trait GridStore: Send + Sync {
    /// Number of persisted cell records.
    async fn count_cells(&self) -> Result<u64, StoreError>;

    async fn find_all_cells(&self) -> Result<Vec<Cell>, StoreError>;

    async fn find_all_agents(&self) -> Result<Vec<Agent>, StoreError>;

    /// Atomically increment `claim_count` and add `agent_id` to `claimants`,
    /// creating the record on first claim.
    ///
    /// `Ok(None)` means the store completed the call but refused the claim.
    async fn claim_cell(&self, x: u32, y: u32, agent_id: &AgentId) -> Result<Option<Cell>, StoreError>;

    /// A uniformly chosen cell with `claim_count == 0`, or `None` when the grid is exhausted.
    async fn pick_undiscovered_cell(&self) -> Result<Option<Cell>, StoreError>;

    /// Grid-adjacent cells (Chebyshev distance 1, clipped) with `claim_count == 0`.
    async fn undiscovered_neighbors(&self, x: u32, y: u32) -> Result<Vec<Cell>, StoreError>;

    /// Delete every cell record; returns how many existed.
    async fn reset_grid(&self) -> Result<u64, StoreError>;

    /// Upsert a partial agent update; returns the record after the update.
    async fn update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<Option<Agent>, StoreError>;

    /// Create the agent record if absent, leaving an existing one untouched
    /// except for `is_exploring`, which is reset to `false`.
    async fn register_agent(&self, id: &AgentId) -> Result<Agent, StoreError> {
        let patch = AgentPatch {
            is_exploring: Some(false),
            ..AgentPatch::default()
        };
        self.update_agent(id, &patch)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("agent {}", id)))
    }

    async fn all_agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.find_all_agents().await
    }

    /// Number of discovered cells that list each agent as a claimant.
    async fn claim_counts_by_agent(&self) -> Result<HashMap<String, u64>, StoreError> {
        let mut counts = HashMap::new();
        for cell in self.find_all_cells().await? {
            for agent in cell.claimants {
                *counts.entry(agent).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Label for simulation stats.
    fn database_name(&self) -> String;
}

/// A store handle that can take part in failover reconciliation.
#[async_trait]
pub trait ReplicaStore: GridStore {
    /// Insert every cell whose key is absent from this store. Existing records
    /// are never touched. Returns the number inserted.
    async fn insert_missing_cells(&self, cells: &[Cell]) -> Result<u64, StoreError>;

    /// Replace the whole content with `cells` and `agents` (delete, then bulk upsert).
    async fn replace_all(&self, cells: &[Cell], agents: &[Agent]) -> Result<(), StoreError>;

    /// Subscribe to this handle's change feed.
    async fn watch(&self) -> Result<ChangeStream, StoreError>;

    /// Cheap liveness check used when falling back to this handle.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Revision conflict: {0}")]
    Conflict(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Transient failures the caller should retry after a fixed delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_)
                | StoreError::Timeout
                | StoreError::Database(_)
                | StoreError::Conflict(_)
                | StoreError::Unavailable(_)
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            sqlx::Error::Io(e) => StoreError::Network(e.to_string()),
            sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool closed".to_string()),
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_connect() {
            StoreError::Network(err.to_string())
        } else if err.is_decode() {
            StoreError::Serialization(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Timeout.is_retryable());
        assert!(StoreError::Network("reset".into()).is_retryable());
        assert!(!StoreError::Serialization("bad json".into()).is_retryable());
        assert!(!StoreError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Conflict Merge Rules
//!
//! Multi-writer backends can keep several revisions of one cell. The merge is:
//!
//! - `claim_count = current.claim_count + number_of_conflicting_revisions`
//!   (each losing revision stands for exactly one extra claim);
//! - `claimants = current.claimants ∪ every conflicting revision's claimants`.
//!
//! Claimant order is not significant, but the merge keeps the current
//! revision's order first and appends newcomers in revision order. That makes
//! resolving `{A, B}` then `{C}` produce the same value as resolving `{A, B, C}`.
//!
//! Exactly one process resolves a given conflict: the one whose agent id is the
//! first claimant on the current revision.

use async_trait::async_trait;

use crate::domain::agent::AgentId;
use crate::domain::cell::{Cell, CellKey};
use crate::domain::repository::StoreError;

/// One conflicted cell as surfaced by the conflict view.
#[derive(Debug, Clone, PartialEq)]
pub struct CellConflict {
    pub key: CellKey,
    /// Revision id of the winning (current) revision.
    pub current_rev: String,
    pub current: Cell,
    /// Revision ids of the losing revisions.
    pub conflicting_revs: Vec<String>,
}

/// Conflict-related operations of a multi-writer store.
#[async_trait]
pub trait ConflictStore: Send + Sync {
    /// Wait for the next change that touches a conflicted document, starting
    /// after `since`. Returns the sequence to resume from.
    async fn wait_for_conflict_changes(&self, since: Option<String>) -> Result<String, StoreError>;

    async fn conflicting_cells(&self) -> Result<Vec<CellConflict>, StoreError>;

    async fn load_revisions(&self, key: &CellKey, revs: &[String]) -> Result<Vec<Cell>, StoreError>;

    /// Write `merged` as the new current revision of `conflict.key`.
    async fn write_merged(&self, conflict: &CellConflict, merged: &Cell) -> Result<(), StoreError>;

    /// Tombstone every listed revision in one bulk call.
    async fn tombstone_revisions(&self, key: &CellKey, revs: &[String]) -> Result<(), StoreError>;
}

/// Merge `conflicting` revisions into `current`.
pub fn merge_conflicts(current: &Cell, conflicting: &[Cell]) -> Cell {
    let mut merged = current.clone();
    merged.claim_count = current.claim_count + conflicting.len() as u64;
    for revision in conflicting {
        for claimant in &revision.claimants {
            merged.add_claimant(claimant);
        }
    }
    merged
}

/// Whether `agent_id` owns resolution of a conflict whose current revision is `current`.
pub fn is_designated_resolver(current: &Cell, agent_id: &AgentId) -> bool {
    current
        .claimants
        .first()
        .map(|first| first == agent_id.as_str())
        .unwrap_or(false)
}

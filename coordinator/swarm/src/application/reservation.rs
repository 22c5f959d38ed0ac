// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cell Reservation Protocol
//!
//! Backend-agnostic claim used by the explorer. The outcome distinguishes a
//! store that refused the claim from a store that failed to answer: the
//! explorer skips a refused cell but advances onto a failed one.

use gridswarm_core::domain::agent::AgentId;
use gridswarm_core::domain::cell::Cell;
use gridswarm_core::domain::repository::{GridStore, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum ReservationOutcome {
    Claimed(Cell),
    /// The store answered but would not record the claim.
    Rejected,
    /// The claim call itself failed; retryable.
    Failed(StoreError),
}

impl ReservationOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ReservationOutcome::Claimed(_))
    }
}

#[derive(Clone)]
pub struct ReservationProtocol {
    store: Arc<dyn GridStore>,
}

impl ReservationProtocol {
    pub fn new(store: Arc<dyn GridStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn GridStore> {
        &self.store
    }

    pub async fn reserve(&self, x: u32, y: u32, agent_id: &AgentId) -> ReservationOutcome {
        match self.store.claim_cell(x, y, agent_id).await {
            Ok(Some(cell)) => {
                metrics::counter!("gridswarm_claims_total", "result" => "claimed").increment(1);
                debug!(
                    agent = %agent_id,
                    x,
                    y,
                    claim_count = cell.claim_count,
                    first = cell.is_first_discovery(),
                    "Cell claimed"
                );
                ReservationOutcome::Claimed(cell)
            }
            Ok(None) => {
                metrics::counter!("gridswarm_claims_total", "result" => "rejected").increment(1);
                debug!(agent = %agent_id, x, y, "Cell already reserved");
                ReservationOutcome::Rejected
            }
            Err(e) => {
                metrics::counter!("gridswarm_claim_failures_total").increment(1);
                warn!(agent = %agent_id, x, y, "Error updating cell: {}", e);
                ReservationOutcome::Failed(e)
            }
        }
    }
}

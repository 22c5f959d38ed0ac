// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Conflict Resolver - Background merge of divergent cell revisions
//!
//! Long-polls the store's change feed filtered to conflicted documents. On
//! every wake it lists all conflicted cells and resolves the ones this agent
//! owns (first claimant on the current revision). Resolution:
//!
//! 1. fetch every conflicting revision
//! 2. merge (`claim_count = current + #conflicts`, `claimants = union`)
//! 3. write the merge as the new current revision
//! 4. tombstone all conflicting revisions in one bulk call
//!
//! Failures are logged; the conflict stays in the view. Any failed scan or
//! failed resolution waits a fixed backoff before the next long-poll.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::cell::Cell;
use crate::domain::conflict::{is_designated_resolver, merge_conflicts, CellConflict, ConflictStore};
use crate::domain::repository::StoreError;

/// Outcome of one pass over the conflict view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictScan {
    pub resolved: usize,
    pub failed: usize,
}

pub struct ConflictResolver {
    store: Arc<dyn ConflictStore>,
    agent_id: AgentId,
    backoff: Duration,
    shutdown_token: CancellationToken,
}

impl ConflictResolver {
    pub fn new(store: Arc<dyn ConflictStore>, agent_id: AgentId, backoff: Duration) -> Self {
        Self {
            store,
            agent_id,
            backoff,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(agent = %self.agent_id, "[CouchDB] Monitoring conflicts using longpoll");
        let mut since: Option<String> = None;

        loop {
            let woke = tokio::select! {
                result = self.store.wait_for_conflict_changes(since.clone()) => result,
                _ = self.shutdown_token.cancelled() => break,
            };

            let failed = match woke {
                Ok(seq) => {
                    since = Some(seq);
                    match self.resolve_pending().await {
                        Ok(scan) => {
                            if scan.resolved > 0 || scan.failed > 0 {
                                debug!(resolved = scan.resolved, failed = scan.failed, "Conflict scan finished");
                            }
                            scan.failed > 0
                        }
                        Err(e) => {
                            warn!("[CouchDB] Error resolving conflicts from view: {}", e);
                            true
                        }
                    }
                }
                Err(e) => {
                    warn!("[CouchDB] Failed to fetch conflict changes: {}", e);
                    true
                }
            };

            if failed {
                tokio::select! {
                    _ = tokio::time::sleep(self.backoff) => {}
                    _ = self.shutdown_token.cancelled() => break,
                }
            }
        }

        info!("Conflict resolver stopped");
    }

    /// Resolve every conflict this agent owns. Individual failures are logged,
    /// counted and left for the next scan.
    pub async fn resolve_pending(&self) -> Result<ConflictScan, StoreError> {
        let conflicts = self.store.conflicting_cells().await?;
        let mut scan = ConflictScan::default();

        for conflict in conflicts
            .iter()
            .filter(|c| is_designated_resolver(&c.current, &self.agent_id))
        {
            match self.resolve(conflict).await {
                Ok(merged) => {
                    scan.resolved += 1;
                    info!(
                        cell = %conflict.key,
                        claim_count = merged.claim_count,
                        revisions = conflict.conflicting_revs.len(),
                        "[CouchDB] Conflict resolved"
                    );
                }
                Err(e) => {
                    scan.failed += 1;
                    warn!(cell = %conflict.key, "[CouchDB] Error resolving conflict: {}", e);
                }
            }
        }
        Ok(scan)
    }

    pub async fn resolve(&self, conflict: &CellConflict) -> Result<Cell, StoreError> {
        let revisions = self
            .store
            .load_revisions(&conflict.key, &conflict.conflicting_revs)
            .await?;
        let merged = merge_conflicts(&conflict.current, &revisions);

        self.store.write_merged(conflict, &merged).await?;
        self.store
            .tombstone_revisions(&conflict.key, &conflict.conflicting_revs)
            .await?;

        metrics::counter!("gridswarm_conflicts_resolved_total").increment(1);
        Ok(merged)
    }
}

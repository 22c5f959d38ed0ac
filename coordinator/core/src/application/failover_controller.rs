// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Failover Controller - Background health polling and standalone mirroring
//!
//! Drives the mode of a [`FailoverGridStore`]:
//!
//! - **Health loop** (default every 3s): probe the primary cluster. With at
//!   least `healthy_quorum` healthy members while standalone, reconnect the
//!   primary, switch to it and reconcile standalone cells into it. Below quorum
//!   while primary, switch to standalone. A failed probe forces standalone and
//!   checks the standalone handle; if that is down too, the next tick retries.
//! - **Mirror loop** (default every 5s, primary mode only): overwrite the
//!   standalone store with the primary's full cell and agent sets.
//!
//! Reconciliation is a union by key: only standalone cells whose key is absent
//! on the primary are inserted, so a primary record is never overwritten.
//! Reconciliation and mirroring share a lock. A failed reconciliation stays
//! pending and is retried on every health tick in primary mode; the mirror
//! pass is skipped until it succeeds, so standalone-only cells are never wiped
//! before they reach the primary.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::cluster::{healthy_count, ClusterHealthProbe};
use crate::domain::config::FailoverSettings;
use crate::domain::repository::{ReplicaStore, StoreError};
use crate::infrastructure::repositories::{BackendConnector, BackendMode, FailoverGridStore};

#[derive(Debug, Clone)]
pub struct FailoverControllerConfig {
    pub health_check_interval: Duration,
    pub replication_interval: Duration,
    /// Healthy members required to run on the primary cluster
    pub healthy_quorum: usize,
}

impl Default for FailoverControllerConfig {
    fn default() -> Self {
        Self::from(&FailoverSettings::default())
    }
}

impl From<&FailoverSettings> for FailoverControllerConfig {
    fn from(settings: &FailoverSettings) -> Self {
        Self {
            health_check_interval: settings.health_check_interval(),
            replication_interval: settings.replication_interval(),
            healthy_quorum: settings.healthy_quorum,
        }
    }
}

/// What one health cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Unchanged(BackendMode),
    SwitchedToPrimary { reconciled: u64 },
    /// Still primary; an earlier failed reconciliation now went through.
    Reconciled { reconciled: u64 },
    /// Primary is active but standalone cells are not yet copied into it.
    /// Mirroring is held back until a later tick reconciles.
    ReconcilePending,
    SwitchedToStandalone,
    /// Primary reconnect failed after a healthy probe; still standalone.
    PrimaryUnreachable,
    /// Probe failed; standalone is active. `standalone_reachable == false`
    /// means both sides are down until a later tick.
    ProbeFailed { standalone_reachable: bool },
}

/// Mode the store should move to, if any.
pub fn decide_mode(current: BackendMode, healthy_members: usize, quorum: usize) -> Option<BackendMode> {
    match current {
        BackendMode::Standalone if healthy_members >= quorum => Some(BackendMode::Primary),
        BackendMode::Primary if healthy_members < quorum => Some(BackendMode::Standalone),
        _ => None,
    }
}

/// Guarded by the sync lock.
#[derive(Debug, Default)]
struct SyncState {
    reconcile_pending: bool,
}

pub struct FailoverController {
    store: Arc<FailoverGridStore>,
    probe: Arc<dyn ClusterHealthProbe>,
    connector: Arc<dyn BackendConnector>,
    config: FailoverControllerConfig,
    sync_lock: Mutex<SyncState>,
    shutdown_token: CancellationToken,
}

impl FailoverController {
    pub fn new(
        store: Arc<FailoverGridStore>,
        probe: Arc<dyn ClusterHealthProbe>,
        connector: Arc<dyn BackendConnector>,
        config: FailoverControllerConfig,
    ) -> Self {
        Self {
            store,
            probe,
            connector,
            config,
            sync_lock: Mutex::new(SyncState::default()),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Stop together with an outer token.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn store(&self) -> &Arc<FailoverGridStore> {
        &self.store
    }

    /// Start both loops. The handle completes after shutdown.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::join!(self.run_health_loop(), self.run_mirror_loop());
        })
    }

    async fn run_health_loop(&self) {
        info!(
            interval_ms = self.config.health_check_interval.as_millis() as u64,
            quorum = self.config.healthy_quorum,
            "Starting failover health loop"
        );
        let mut tick = interval(self.config.health_check_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let outcome = self.health_cycle().await;
                    debug!(?outcome, "Health cycle finished");
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping failover health loop");
                    break;
                }
            }
        }
    }

    async fn run_mirror_loop(&self) {
        let mut tick = interval(self.config.replication_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.mirror_cycle().await {
                        Ok(Some((cells, agents))) => debug!(cells, agents, "Standalone mirror refreshed"),
                        Ok(None) => {}
                        Err(e) => warn!("Standalone mirror failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping standalone mirror");
                    break;
                }
            }
        }
    }

    /// Probe once and apply the resulting mode decision.
    pub async fn health_cycle(&self) -> HealthOutcome {
        let mode = self.store.mode();

        let members = match self.probe.members().await {
            Ok(members) => members,
            Err(e) => {
                warn!("Primary cluster probe failed: {}", e);
                return self.fall_back_to_standalone().await;
            }
        };

        let healthy = healthy_count(&members);
        debug!(healthy, total = members.len(), mode = %mode, "Cluster probe");

        match decide_mode(mode, healthy, self.config.healthy_quorum) {
            Some(BackendMode::Primary) => self.promote_primary(healthy).await,
            Some(BackendMode::Standalone) => {
                warn!(
                    healthy,
                    quorum = self.config.healthy_quorum,
                    "Primary cluster below quorum, switching to standalone"
                );
                self.store.switch_to(BackendMode::Standalone);
                metrics::counter!("gridswarm_failovers_total", "to" => "standalone").increment(1);
                HealthOutcome::SwitchedToStandalone
            }
            None if mode == BackendMode::Primary => self.retry_pending_reconcile().await,
            None => HealthOutcome::Unchanged(mode),
        }
    }

    async fn retry_pending_reconcile(&self) -> HealthOutcome {
        let mut state = self.sync_lock.lock().await;
        if !state.reconcile_pending {
            return HealthOutcome::Unchanged(BackendMode::Primary);
        }

        match reconcile(self.store.standalone().as_ref(), self.store.primary().as_ref()).await {
            Ok(reconciled) => {
                state.reconcile_pending = false;
                info!(reconciled, "Pending reconciliation into primary completed");
                HealthOutcome::Reconciled { reconciled }
            }
            Err(e) => {
                warn!("Reconciliation into primary still failing, retrying next interval: {}", e);
                HealthOutcome::ReconcilePending
            }
        }
    }

    async fn promote_primary(&self, healthy: usize) -> HealthOutcome {
        let mut state = self.sync_lock.lock().await;

        let primary = match self.connector.connect_primary().await {
            Ok(primary) => primary,
            Err(e) => {
                warn!("Primary cluster healthy ({} members) but reconnect failed: {}", healthy, e);
                return HealthOutcome::PrimaryUnreachable;
            }
        };

        self.store.replace_primary(primary.clone());
        self.store.switch_to(BackendMode::Primary);
        metrics::counter!("gridswarm_failovers_total", "to" => "primary").increment(1);
        info!(healthy, "Primary cluster healthy, switched to primary");

        state.reconcile_pending = true;
        match reconcile(self.store.standalone().as_ref(), primary.as_ref()).await {
            Ok(reconciled) => {
                state.reconcile_pending = false;
                HealthOutcome::SwitchedToPrimary { reconciled }
            }
            Err(e) => {
                error!("Reconciliation into primary failed, mirroring held back: {}", e);
                HealthOutcome::ReconcilePending
            }
        }
    }

    async fn fall_back_to_standalone(&self) -> HealthOutcome {
        if self.store.mode() == BackendMode::Primary {
            warn!("Treating primary cluster as unreachable, switching to standalone");
            self.store.switch_to(BackendMode::Standalone);
            metrics::counter!("gridswarm_failovers_total", "to" => "standalone").increment(1);
        }

        if self.store.standalone().ping().await.is_ok() {
            return HealthOutcome::ProbeFailed {
                standalone_reachable: true,
            };
        }

        match self.connector.connect_standalone().await {
            Ok(standalone) => {
                info!("Standalone connection re-established");
                self.store.replace_standalone(standalone);
                HealthOutcome::ProbeFailed {
                    standalone_reachable: true,
                }
            }
            Err(e) => {
                error!("Standalone also unreachable, retrying next interval: {}", e);
                HealthOutcome::ProbeFailed {
                    standalone_reachable: false,
                }
            }
        }
    }

    /// Push the primary's full state to the standalone store. `None` when not
    /// in primary mode or while a reconciliation is pending.
    pub async fn mirror_cycle(&self) -> Result<Option<(usize, usize)>, StoreError> {
        let state = self.sync_lock.lock().await;
        if self.store.mode() != BackendMode::Primary {
            return Ok(None);
        }
        if state.reconcile_pending {
            debug!("Reconciliation pending, skipping standalone mirror");
            return Ok(None);
        }

        let primary = self.store.primary();
        let cells = primary.find_all_cells().await?;
        let agents = primary.find_all_agents().await?;
        self.store.standalone().replace_all(&cells, &agents).await?;
        Ok(Some((cells.len(), agents.len())))
    }
}

/// Copy discovered `source` cells whose key is missing from `target`.
pub async fn reconcile(source: &dyn ReplicaStore, target: &dyn ReplicaStore) -> Result<u64, StoreError> {
    let discovered: Vec<_> = source
        .find_all_cells()
        .await?
        .into_iter()
        .filter(|c| c.claim_count != 0)
        .collect();
    let inserted = target.insert_missing_cells(&discovered).await?;
    metrics::counter!("gridswarm_reconciled_cells_total").increment(inserted);
    info!(candidates = discovered.len(), inserted, "Reconciled standalone cells into primary");
    Ok(inserted)
}

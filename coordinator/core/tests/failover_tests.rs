// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the strong-consistency failover path.
//!
//! The PostgreSQL pair is replaced by two in-memory replica stores and the
//! cluster probe by a scripted mock, so every decision of the health loop can
//! be driven deterministically:
//! - below-quorum probe while primary -> standalone takes live traffic
//! - quorum restored while standalone -> primary, standalone cells reconciled
//! - probe failure -> forced standalone, never fatal
//! - mirror job only runs in primary mode
//! - a failed reconciliation holds the mirror back until a later tick succeeds

use async_trait::async_trait;
use gridswarm_core::application::failover_controller::{reconcile, FailoverController, FailoverControllerConfig, HealthOutcome};
use gridswarm_core::domain::agent::{Agent, AgentId, AgentPatch};
use gridswarm_core::domain::cell::{Cell, GridBounds};
use gridswarm_core::domain::cluster::{ClusterHealthProbe, MemberHealth, MemberRole};
use gridswarm_core::domain::events::ChangeStream;
use gridswarm_core::domain::repository::{GridStore, ReplicaStore, StoreError};
use gridswarm_core::infrastructure::repositories::{BackendConnector, BackendMode, FailoverGridStore, InMemoryGridStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct ScriptedProbe {
    healthy: Mutex<Option<usize>>,
}

impl ScriptedProbe {
    fn new(healthy: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            healthy: Mutex::new(healthy),
        })
    }

    /// `None` makes the probe fail.
    fn set(&self, healthy: Option<usize>) {
        *self.healthy.lock() = healthy;
    }
}

#[async_trait]
impl ClusterHealthProbe for ScriptedProbe {
    async fn members(&self) -> Result<Vec<MemberHealth>, StoreError> {
        let healthy = (*self.healthy.lock()).ok_or(StoreError::Timeout)?;
        let mut members = vec![MemberHealth::new("pg-0", MemberRole::Primary)];
        for i in 1..healthy {
            members.push(MemberHealth::new(format!("pg-{}", i), MemberRole::Secondary));
        }
        members.push(MemberHealth::new("pg-lagging", MemberRole::Other("catchup".into())));
        if healthy == 0 {
            members.remove(0);
        }
        Ok(members)
    }
}

struct FixedConnector {
    primary: Option<Arc<dyn ReplicaStore>>,
    standalone: Option<Arc<dyn ReplicaStore>>,
}

#[async_trait]
impl BackendConnector for FixedConnector {
    async fn connect_primary(&self) -> Result<Arc<dyn ReplicaStore>, StoreError> {
        self.primary
            .clone()
            .ok_or_else(|| StoreError::Unavailable("primary down".into()))
    }

    async fn connect_standalone(&self) -> Result<Arc<dyn ReplicaStore>, StoreError> {
        self.standalone
            .clone()
            .ok_or_else(|| StoreError::Unavailable("standalone down".into()))
    }
}

/// A handle whose server is gone.
struct DownStore;

#[async_trait]
impl GridStore for DownStore {
    async fn count_cells(&self) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    async fn find_all_cells(&self) -> Result<Vec<Cell>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    async fn find_all_agents(&self) -> Result<Vec<Agent>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    async fn claim_cell(&self, _x: u32, _y: u32, _a: &AgentId) -> Result<Option<Cell>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    async fn pick_undiscovered_cell(&self) -> Result<Option<Cell>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    async fn undiscovered_neighbors(&self, _x: u32, _y: u32) -> Result<Vec<Cell>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    async fn reset_grid(&self) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    async fn update_agent(&self, _id: &AgentId, _p: &AgentPatch) -> Result<Option<Agent>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    fn database_name(&self) -> String {
        "down".to_string()
    }
}

#[async_trait]
impl ReplicaStore for DownStore {
    async fn insert_missing_cells(&self, _cells: &[Cell]) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    async fn replace_all(&self, _cells: &[Cell], _agents: &[Agent]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
}

/// In-memory replica whose first `failures` bulk inserts error out.
struct FlakyInsertStore {
    inner: InMemoryGridStore,
    failures: AtomicUsize,
}

#[async_trait]
impl GridStore for FlakyInsertStore {
    async fn count_cells(&self) -> Result<u64, StoreError> {
        self.inner.count_cells().await
    }
    async fn find_all_cells(&self) -> Result<Vec<Cell>, StoreError> {
        self.inner.find_all_cells().await
    }
    async fn find_all_agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.inner.find_all_agents().await
    }
    async fn claim_cell(&self, x: u32, y: u32, agent_id: &AgentId) -> Result<Option<Cell>, StoreError> {
        self.inner.claim_cell(x, y, agent_id).await
    }
    async fn pick_undiscovered_cell(&self) -> Result<Option<Cell>, StoreError> {
        self.inner.pick_undiscovered_cell().await
    }
    async fn undiscovered_neighbors(&self, x: u32, y: u32) -> Result<Vec<Cell>, StoreError> {
        self.inner.undiscovered_neighbors(x, y).await
    }
    async fn reset_grid(&self) -> Result<u64, StoreError> {
        self.inner.reset_grid().await
    }
    async fn update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<Option<Agent>, StoreError> {
        self.inner.update_agent(id, patch).await
    }
    fn database_name(&self) -> String {
        self.inner.database_name()
    }
}

#[async_trait]
impl ReplicaStore for FlakyInsertStore {
    async fn insert_missing_cells(&self, cells: &[Cell]) -> Result<u64, StoreError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Network("connection reset".into()));
        }
        self.inner.insert_missing_cells(cells).await
    }
    async fn replace_all(&self, cells: &[Cell], agents: &[Agent]) -> Result<(), StoreError> {
        self.inner.replace_all(cells, agents).await
    }
    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        self.inner.watch().await
    }
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

struct Harness {
    primary: InMemoryGridStore,
    standalone: InMemoryGridStore,
    store: Arc<FailoverGridStore>,
    probe: Arc<ScriptedProbe>,
    controller: Arc<FailoverController>,
}

fn harness(initial: BackendMode, healthy: Option<usize>) -> Harness {
    let bounds = GridBounds::new(5);
    let primary = InMemoryGridStore::named("primary", bounds);
    let standalone = InMemoryGridStore::named("standalone", bounds);
    let store = Arc::new(FailoverGridStore::new(
        Arc::new(primary.clone()),
        Arc::new(standalone.clone()),
        initial,
    ));
    let probe = ScriptedProbe::new(healthy);
    let connector = Arc::new(FixedConnector {
        primary: Some(Arc::new(primary.clone())),
        standalone: Some(Arc::new(standalone.clone())),
    });
    let controller = Arc::new(FailoverController::new(
        store.clone(),
        probe.clone(),
        connector,
        FailoverControllerConfig::default(),
    ));
    Harness {
        primary,
        standalone,
        store,
        probe,
        controller,
    }
}

fn cell(x: u32, y: u32, count: u64, claimants: &[&str]) -> Cell {
    Cell {
        x,
        y,
        claim_count: count,
        claimants: claimants.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_below_quorum_switches_to_standalone_and_claims_follow() {
    let h = harness(BackendMode::Primary, Some(2));
    let agent = AgentId::new("A");

    assert_eq!(h.controller.health_cycle().await, HealthOutcome::SwitchedToStandalone);
    assert_eq!(h.store.mode(), BackendMode::Standalone);

    h.store.claim_cell(3, 3, &agent).await.unwrap();
    assert!(h.standalone.get_cell(3, 3).is_some());
    assert!(h.primary.get_cell(3, 3).is_none());
}

#[tokio::test]
async fn test_healthy_cluster_keeps_primary() {
    let h = harness(BackendMode::Primary, Some(3));
    assert_eq!(
        h.controller.health_cycle().await,
        HealthOutcome::Unchanged(BackendMode::Primary)
    );
}

#[tokio::test]
async fn test_quorum_restored_switches_to_primary_and_reconciles() {
    let h = harness(BackendMode::Standalone, Some(3));
    h.primary.put_cell(cell(0, 0, 5, &["A"]));
    h.standalone.put_cell(cell(0, 0, 1, &["B"]));
    h.standalone.put_cell(cell(1, 1, 2, &["B", "C"]));
    h.standalone.put_cell(cell(2, 2, 0, &[]));

    let outcome = h.controller.health_cycle().await;
    assert_eq!(outcome, HealthOutcome::SwitchedToPrimary { reconciled: 1 });
    assert_eq!(h.store.mode(), BackendMode::Primary);

    // Primary record kept, standalone-only discovered cell copied, zero cell skipped
    assert_eq!(h.primary.get_cell(0, 0).unwrap().claim_count, 5);
    assert_eq!(h.primary.get_cell(1, 1).unwrap().claim_count, 2);
    assert!(h.primary.get_cell(2, 2).is_none());
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let bounds = GridBounds::new(4);
    let source = InMemoryGridStore::named("standalone", bounds);
    let target = InMemoryGridStore::named("primary", bounds);
    source.put_cell(cell(0, 1, 1, &["A"]));
    source.put_cell(cell(2, 3, 4, &["A", "B"]));
    target.put_cell(cell(0, 1, 9, &["C"]));

    assert_eq!(reconcile(&source, &target).await.unwrap(), 1);
    let once = target.find_all_cells().await.unwrap();

    assert_eq!(reconcile(&source, &target).await.unwrap(), 0);
    let twice = target.find_all_cells().await.unwrap();

    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_probe_failure_forces_standalone() {
    let h = harness(BackendMode::Primary, None);
    assert_eq!(
        h.controller.health_cycle().await,
        HealthOutcome::ProbeFailed {
            standalone_reachable: true
        }
    );
    assert_eq!(h.store.mode(), BackendMode::Standalone);
}

#[tokio::test]
async fn test_both_sides_down_is_not_fatal() {
    let bounds = GridBounds::new(3);
    let store = Arc::new(FailoverGridStore::new(
        Arc::new(InMemoryGridStore::named("primary", bounds)),
        Arc::new(DownStore),
        BackendMode::Primary,
    ));
    let controller = FailoverController::new(
        store.clone(),
        ScriptedProbe::new(None),
        Arc::new(FixedConnector {
            primary: None,
            standalone: None,
        }),
        FailoverControllerConfig::default(),
    );

    assert_eq!(
        controller.health_cycle().await,
        HealthOutcome::ProbeFailed {
            standalone_reachable: false
        }
    );
    assert_eq!(store.mode(), BackendMode::Standalone);

    // Next tick retries the same path
    assert_eq!(
        controller.health_cycle().await,
        HealthOutcome::ProbeFailed {
            standalone_reachable: false
        }
    );
}

#[tokio::test]
async fn test_healthy_probe_but_primary_reconnect_fails() {
    let bounds = GridBounds::new(3);
    let standalone = InMemoryGridStore::named("standalone", bounds);
    let store = Arc::new(FailoverGridStore::new(
        Arc::new(InMemoryGridStore::named("primary", bounds)),
        Arc::new(standalone.clone()),
        BackendMode::Standalone,
    ));
    let controller = FailoverController::new(
        store.clone(),
        ScriptedProbe::new(Some(3)),
        Arc::new(FixedConnector {
            primary: None,
            standalone: Some(Arc::new(standalone)),
        }),
        FailoverControllerConfig::default(),
    );

    assert_eq!(controller.health_cycle().await, HealthOutcome::PrimaryUnreachable);
    assert_eq!(store.mode(), BackendMode::Standalone);
}

#[tokio::test]
async fn test_mirror_only_in_primary_mode() {
    let h = harness(BackendMode::Standalone, Some(3));
    h.primary.put_cell(cell(4, 4, 1, &["A"]));
    h.standalone.put_cell(cell(0, 0, 1, &["stale"]));

    assert_eq!(h.controller.mirror_cycle().await.unwrap(), None);
    assert!(h.standalone.get_cell(0, 0).is_some());

    h.store.switch_to(BackendMode::Primary);
    h.primary
        .update_agent(&AgentId::new("A"), &AgentPatch::default())
        .await
        .unwrap();
    assert_eq!(h.controller.mirror_cycle().await.unwrap(), Some((1, 1)));

    assert!(h.standalone.get_cell(0, 0).is_none());
    assert_eq!(h.standalone.get_cell(4, 4).unwrap().claimants, vec!["A".to_string()]);
    assert!(h.standalone.get_agent(&AgentId::new("A")).is_some());
}

#[tokio::test]
async fn test_failed_reconciliation_holds_mirror_until_retried() {
    let bounds = GridBounds::new(5);
    let primary = InMemoryGridStore::named("primary", bounds);
    let standalone = InMemoryGridStore::named("standalone", bounds);
    standalone.put_cell(cell(1, 1, 2, &["A", "B"]));

    let flaky: Arc<dyn ReplicaStore> = Arc::new(FlakyInsertStore {
        inner: primary.clone(),
        failures: AtomicUsize::new(2),
    });
    let store = Arc::new(FailoverGridStore::new(
        flaky.clone(),
        Arc::new(standalone.clone()),
        BackendMode::Standalone,
    ));
    let controller = FailoverController::new(
        store.clone(),
        ScriptedProbe::new(Some(3)),
        Arc::new(FixedConnector {
            primary: Some(flaky),
            standalone: Some(Arc::new(standalone.clone())),
        }),
        FailoverControllerConfig::default(),
    );

    assert_eq!(controller.health_cycle().await, HealthOutcome::ReconcilePending);
    assert_eq!(store.mode(), BackendMode::Primary);

    // Mirroring now would overwrite standalone with a primary that lacks (1,1)
    assert_eq!(controller.mirror_cycle().await.unwrap(), None);
    assert_eq!(standalone.get_cell(1, 1).unwrap().claim_count, 2);

    assert_eq!(controller.health_cycle().await, HealthOutcome::ReconcilePending);
    assert_eq!(controller.mirror_cycle().await.unwrap(), None);

    assert_eq!(
        controller.health_cycle().await,
        HealthOutcome::Reconciled { reconciled: 1 }
    );
    assert_eq!(primary.get_cell(1, 1).unwrap().claim_count, 2);

    assert_eq!(controller.mirror_cycle().await.unwrap(), Some((1, 0)));
    assert_eq!(standalone.get_cell(1, 1).unwrap().claim_count, 2);
    assert_eq!(
        controller.health_cycle().await,
        HealthOutcome::Unchanged(BackendMode::Primary)
    );
}

#[tokio::test(start_paused = true)]
async fn test_health_loop_follows_probe_over_time() {
    let h = harness(BackendMode::Standalone, Some(3));
    let token = h.controller.shutdown_token();
    let handle = h.controller.clone().start();

    // First tick fires immediately
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.store.mode(), BackendMode::Primary);

    h.probe.set(Some(1));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.store.mode(), BackendMode::Standalone);

    h.probe.set(Some(4));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.store.mode(), BackendMode::Primary);

    token.cancel();
    handle.await.unwrap();
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Explorer - One agent's run over the shared grid
//!
//! A run goes through these steps:
//!
//! 1. Persist `is_exploring = true` and the start time, and clear the end time.
//! 2. Pick a random undiscovered start cell. The start cell itself is not claimed.
//! 3. Walk: claim a random undiscovered neighbour and move onto it. A failed
//!    claim still moves the agent. A refused claim falls through to a teleport.
//! 4. Teleport: with no frontier, claim a random undiscovered cell anywhere.
//!    When none is left the walk ends.
//! 5. Persist `is_exploring = false` and the end time.
//! 6. Barrier: poll agent records until nobody is exploring.
//! 7. Compute the simulation stats and hand them to the stats sink.
//!
//! Storage errors during the walk are logged and never end the run.

use chrono::Utc;
use gridswarm_core::domain::agent::{Agent, AgentId, AgentPatch};
use gridswarm_core::domain::cell::{choose_uniform, GridBounds};
use gridswarm_core::domain::repository::{GridStore, StoreError};
use gridswarm_core::domain::stats::{SimulationStats, StatsSink};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::reservation::{ReservationOutcome, ReservationProtocol};
use crate::domain::{ExplorationConfig, ExplorationError, ExplorationReport, ExplorationSummary, ExplorerState};

pub struct Explorer {
    agent_id: AgentId,
    store: Arc<dyn GridStore>,
    reservation: ReservationProtocol,
    bounds: GridBounds,
    config: ExplorationConfig,
    stats_sink: Option<Arc<dyn StatsSink>>,
    state: Mutex<ExplorerState>,
    shutdown_token: CancellationToken,
}

impl Explorer {
    pub fn new(
        agent_id: AgentId,
        store: Arc<dyn GridStore>,
        bounds: GridBounds,
        config: ExplorationConfig,
    ) -> Self {
        Self {
            agent_id,
            reservation: ReservationProtocol::new(store.clone()),
            store,
            bounds,
            config,
            stats_sink: None,
            state: Mutex::new(ExplorerState::Idle),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn with_stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.stats_sink = Some(sink);
        self
    }

    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn state(&self) -> ExplorerState {
        *self.state.lock()
    }

    /// Create this agent's record, or reset `is_exploring` on an existing one.
    pub async fn register(&self) -> Result<Agent, ExplorationError> {
        let agent = self
            .retrying("register agent", || self.store.register_agent(&self.agent_id))
            .await?;
        info!(agent = %self.agent_id, "Agent registered");
        Ok(agent)
    }

    /// Run the whole state machine once.
    pub async fn run(&self) -> Result<ExplorationSummary, ExplorationError> {
        self.begin()?;

        let result = self.run_to_completion().await;
        match &result {
            Ok(_) => self.set_state(ExplorerState::Done),
            Err(e) => {
                error!(agent = %self.agent_id, "Exploration aborted: {}", e);
                if self.state() == ExplorerState::Exploring {
                    // Keep other agents' barriers from waiting on us
                    let patch = AgentPatch::finish(Utc::now());
                    if let Err(e) = self.store.update_agent(&self.agent_id, &patch).await {
                        warn!(agent = %self.agent_id, "Could not clear exploring flag: {}", e);
                    }
                }
                self.set_state(ExplorerState::Idle);
            }
        }
        result
    }

    fn begin(&self) -> Result<(), ExplorationError> {
        let mut state = self.state.lock();
        if !state.can_start() {
            return Err(ExplorationError::AlreadyExploring(self.agent_id.to_string()));
        }
        *state = ExplorerState::Exploring;
        Ok(())
    }

    fn set_state(&self, next: ExplorerState) {
        let mut state = self.state.lock();
        debug!(agent = %self.agent_id, from = %*state, to = %next, "Explorer state change");
        *state = next;
    }

    async fn run_to_completion(&self) -> Result<ExplorationSummary, ExplorationError> {
        let started = Utc::now();
        info!(agent = %self.agent_id, "Agent started exploring");
        let begin = AgentPatch::begin(started);
        self.retrying("update agent", || self.store.update_agent(&self.agent_id, &begin))
            .await?;

        let report = self.walk().await?;

        let finished = Utc::now();
        let finish = AgentPatch::finish(finished);
        self.retrying("update agent", || self.store.update_agent(&self.agent_id, &finish))
            .await?;
        self.set_state(ExplorerState::Waiting);
        info!(
            agent = %self.agent_id,
            seconds = (finished - started).num_milliseconds() as f64 / 1000.0,
            claimed = report.claimed,
            teleports = report.teleports,
            failed = report.failed,
            "Agent finished exploring"
        );

        self.wait_for_all_agents().await?;
        let stats = self.collect_stats().await?;
        self.record_stats(&stats).await;

        Ok(ExplorationSummary { report, stats })
    }

    /// Frontier walk with teleports, until the grid has no undiscovered cell.
    async fn walk(&self) -> Result<ExplorationReport, ExplorationError> {
        let mut report = ExplorationReport::default();

        let start = match self.retrying("pick start cell", || self.store.pick_undiscovered_cell()).await? {
            Some(cell) => cell,
            None => {
                info!(agent = %self.agent_id, "No undiscovered cells left");
                return Ok(report);
            }
        };
        let (mut x, mut y) = (start.x, start.y);
        debug!(agent = %self.agent_id, x, y, "Start cell picked");

        loop {
            if self.shutdown_token.is_cancelled() {
                return Err(ExplorationError::Cancelled);
            }

            let mut found_frontier = false;
            let neighbors = match self.store.undiscovered_neighbors(x, y).await {
                Ok(neighbors) => neighbors,
                Err(e) => {
                    warn!(agent = %self.agent_id, x, y, "Error reading neighbours: {}", e);
                    self.pause(self.config.step_delay).await?;
                    continue;
                }
            };

            if let Some(target) = choose_uniform(&neighbors) {
                match self.reservation.reserve(target.x, target.y, &self.agent_id).await {
                    ReservationOutcome::Claimed(_) => {
                        report.claimed += 1;
                        (x, y) = (target.x, target.y);
                        debug!(agent = %self.agent_id, x, y, "Agent explored cell");
                        found_frontier = true;
                        self.pause(self.config.step_delay).await?;
                    }
                    ReservationOutcome::Rejected => {
                        report.rejected += 1;
                        debug!(
                            agent = %self.agent_id,
                            x = target.x,
                            y = target.y,
                            "Cell already reserved, looking for another frontier"
                        );
                    }
                    ReservationOutcome::Failed(_) => {
                        report.failed += 1;
                        (x, y) = (target.x, target.y);
                        found_frontier = true;
                        self.pause(self.config.step_delay).await?;
                    }
                }
            }

            if found_frontier {
                continue;
            }

            debug!(agent = %self.agent_id, x, y, "No frontier found, teleporting");
            let target = match self.store.pick_undiscovered_cell().await {
                Ok(Some(cell)) => cell,
                Ok(None) => {
                    info!(agent = %self.agent_id, "No undiscovered cells left, exploration finished");
                    break;
                }
                Err(e) => {
                    warn!(agent = %self.agent_id, "Error teleporting: {}", e);
                    self.pause(self.config.step_delay).await?;
                    continue;
                }
            };

            match self.reservation.reserve(target.x, target.y, &self.agent_id).await {
                ReservationOutcome::Claimed(_) => {
                    report.claimed += 1;
                    report.teleports += 1;
                    metrics::counter!("gridswarm_teleports_total").increment(1);
                    (x, y) = (target.x, target.y);
                    debug!(agent = %self.agent_id, x, y, "Agent teleported");
                    self.pause(self.config.step_delay).await?;
                }
                ReservationOutcome::Rejected => {
                    report.rejected += 1;
                    debug!(agent = %self.agent_id, x = target.x, y = target.y, "Teleport target already reserved");
                    self.pause(self.config.step_delay).await?;
                }
                ReservationOutcome::Failed(_) => {
                    report.failed += 1;
                    self.pause(self.config.step_delay).await?;
                }
            }
        }

        Ok(report)
    }

    /// Block until no agent record reports `is_exploring`.
    pub async fn wait_for_all_agents(&self) -> Result<(), ExplorationError> {
        loop {
            match self.store.find_all_agents().await {
                Ok(agents) => {
                    let exploring: Vec<&str> = agents
                        .iter()
                        .filter(|a| a.is_exploring)
                        .map(|a| a.id.as_str())
                        .collect();
                    if exploring.is_empty() {
                        return Ok(());
                    }
                    info!(
                        agent = %self.agent_id,
                        waiting_on = %exploring.join(", "),
                        "Waiting for other agents to finish"
                    );
                }
                Err(e) => warn!(agent = %self.agent_id, "Error reading agents at barrier: {}", e),
            }
            self.pause(self.config.barrier_poll_interval).await?;
        }
    }

    async fn collect_stats(&self) -> Result<SimulationStats, ExplorationError> {
        let counts = self
            .retrying("count claims", || self.store.claim_counts_by_agent())
            .await?;
        let agents = self.retrying("list agents", || self.store.find_all_agents()).await?;
        Ok(SimulationStats::compute(
            self.bounds,
            &counts,
            &agents,
            self.config.offline_time_secs,
            self.store.database_name(),
        ))
    }

    async fn record_stats(&self, stats: &SimulationStats) {
        let Some(sink) = &self.stats_sink else {
            return;
        };
        info!(agent = %self.agent_id, "Saving simulation results");
        if let Err(e) = sink.record(stats).await {
            error!(agent = %self.agent_id, "Error saving simulation results: {:#}", e);
        }
    }

    /// Sleep, or stop early on shutdown.
    async fn pause(&self, duration: Duration) -> Result<(), ExplorationError> {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.shutdown_token.cancelled() => Err(ExplorationError::Cancelled),
        }
    }

    /// Repeat `op` on transient store errors, pausing `retry_delay` in between.
    async fn retrying<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ExplorationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(agent = %self.agent_id, "{} failed, retrying: {}", what, e);
                    self.pause(self.config.retry_delay).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Exploration State Machine
//!
//! ```text
//! Idle ──▶ Exploring ──▶ Waiting ──▶ Done
//!   ▲                                  │
//!   └──────────── (next run) ──────────┘
//! ```
//!
//! A run may only start from `Idle` or `Done`; starting while `Exploring` or
//! `Waiting` is rejected with [`ExplorationError::AlreadyExploring`].

use gridswarm_core::domain::config::GridConfig;
use gridswarm_core::domain::repository::StoreError;
use gridswarm_core::domain::stats::SimulationStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorerState {
    Idle,
    Exploring,
    /// Finished walking; blocked on the termination barrier.
    Waiting,
    Done,
}

impl ExplorerState {
    pub fn can_start(&self) -> bool {
        matches!(self, ExplorerState::Idle | ExplorerState::Done)
    }
}

impl fmt::Display for ExplorerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExplorerState::Idle => "idle",
            ExplorerState::Exploring => "exploring",
            ExplorerState::Waiting => "waiting",
            ExplorerState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Timing for one agent's run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplorationConfig {
    /// Pause after every claim attempt, successful or not.
    pub step_delay: Duration,
    pub barrier_poll_interval: Duration,
    /// Retry delay for agent-record writes that hit a transient store error.
    pub retry_delay: Duration,
    /// Reported in stats only.
    pub offline_time_secs: f64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self::from(&GridConfig::default())
    }
}

impl From<&GridConfig> for ExplorationConfig {
    fn from(config: &GridConfig) -> Self {
        Self {
            step_delay: config.delay(),
            barrier_poll_interval: config.barrier_poll_interval(),
            retry_delay: config.delay().max(Duration::from_millis(100)),
            offline_time_secs: config.offline_time_secs,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExplorationError {
    #[error("Agent {0} is already exploring")]
    AlreadyExploring(String),

    #[error("Exploration cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Counters for one walk, from start cell to grid exhaustion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationReport {
    /// Claims the store confirmed.
    pub claimed: u64,
    /// Claims the store completed but refused.
    pub rejected: u64,
    /// Claim calls that errored; the agent moved on anyway.
    pub failed: u64,
    pub teleports: u64,
}

impl ExplorationReport {
    pub fn attempts(&self) -> u64 {
        self.claimed + self.rejected + self.failed
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplorationSummary {
    pub report: ExplorationReport,
    pub stats: SimulationStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_idle_or_done_can_start() {
        assert!(ExplorerState::Idle.can_start());
        assert!(ExplorerState::Done.can_start());
        assert!(!ExplorerState::Exploring.can_start());
        assert!(!ExplorerState::Waiting.can_start());
    }

    #[test]
    fn test_config_from_grid_config() {
        let mut grid = GridConfig::default();
        grid.delay_ms = 0;
        grid.barrier_poll_interval_ms = 250;
        grid.offline_time_secs = 12.5;

        let config = ExplorationConfig::from(&grid);
        assert_eq!(config.step_delay, Duration::ZERO);
        assert_eq!(config.barrier_poll_interval, Duration::from_millis(250));
        assert_eq!(config.retry_delay, Duration::from_millis(100));
        assert_eq!(config.offline_time_secs, 12.5);
    }

    #[test]
    fn test_report_attempts() {
        let report = ExplorationReport {
            claimed: 5,
            rejected: 1,
            failed: 2,
            teleports: 3,
        };
        assert_eq!(report.attempts(), 8);
    }
}

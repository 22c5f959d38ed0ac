// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Simulation Stats
//!
//! Write-once summary of a full run, computed after the termination barrier and
//! handed to an external [`StatsSink`]. Not part of the mutable store state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::domain::agent::Agent;
use crate::domain::cell::GridBounds;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub name: String,
    pub tiles_explored: u64,
    /// Seconds between start and end; 0 when either timestamp is missing.
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStats {
    pub grid_side_size: u32,
    pub total_grid_size: u64,
    pub agents_stats: Vec<AgentStats>,
    /// Longest agent duration, in seconds.
    pub exploration_time: f64,
    /// Configured offline time, in seconds.
    pub offline_time: f64,
    pub db_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation_number_id: Option<u64>,
}

impl SimulationStats {
    /// Join per-agent claim counts with agent records.
    ///
    /// Agents appear if they claimed anything or have a record. Sorted by
    /// tiles explored (descending), then name.
    pub fn compute(
        bounds: GridBounds,
        claim_counts: &HashMap<String, u64>,
        agents: &[Agent],
        offline_time: f64,
        db_name: impl Into<String>,
    ) -> Self {
        let by_name: HashMap<&str, &Agent> = agents.iter().map(|a| (a.id.as_str(), a)).collect();
        let names: BTreeSet<&str> = claim_counts
            .keys()
            .map(String::as_str)
            .chain(by_name.keys().copied())
            .collect();

        let mut agents_stats: Vec<AgentStats> = names
            .into_iter()
            .map(|name| {
                let agent = by_name.get(name);
                AgentStats {
                    name: name.to_string(),
                    tiles_explored: claim_counts.get(name).copied().unwrap_or(0),
                    duration: agent.and_then(|a| a.duration_secs()).unwrap_or(0.0),
                    start_time: agent.and_then(|a| a.start_time),
                    end_time: agent.and_then(|a| a.end_time),
                }
            })
            .collect();
        agents_stats.sort_by(|a, b| {
            b.tiles_explored
                .cmp(&a.tiles_explored)
                .then_with(|| a.name.cmp(&b.name))
        });

        let exploration_time = agents_stats
            .iter()
            .map(|a| a.duration)
            .fold(0.0_f64, f64::max);

        Self {
            grid_side_size: bounds.size,
            total_grid_size: bounds.total_cells(),
            agents_stats,
            exploration_time,
            offline_time,
            db_name: db_name.into(),
            simulation_number_id: None,
        }
    }
}

/// External persistence collaborator for finished runs.
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn record(&self, stats: &SimulationStats) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentId, AgentPatch};
    use chrono::Duration;

    #[test]
    fn test_compute_joins_counts_and_durations() {
        let t0 = Utc::now();
        let mut a = Agent::new(AgentId::new("A"));
        a.apply(&AgentPatch::begin(t0));
        a.apply(&AgentPatch::finish(t0 + Duration::seconds(4)));
        let mut b = Agent::new(AgentId::new("B"));
        b.apply(&AgentPatch::begin(t0));
        b.apply(&AgentPatch::finish(t0 + Duration::seconds(9)));

        let counts = HashMap::from([("A".to_string(), 5), ("B".to_string(), 4), ("ghost".to_string(), 1)]);
        let stats = SimulationStats::compute(GridBounds::new(3), &counts, &[a, b], 0.0, "v2grid");

        assert_eq!(stats.grid_side_size, 3);
        assert_eq!(stats.total_grid_size, 9);
        assert_eq!(stats.exploration_time, 9.0);
        assert_eq!(stats.agents_stats.len(), 3);
        assert_eq!(stats.agents_stats[0].name, "A");
        assert_eq!(stats.agents_stats[2].name, "ghost");
        assert_eq!(stats.agents_stats[2].duration, 0.0);
    }

    #[test]
    fn test_serializes_camel_case() {
        let stats = SimulationStats::compute(GridBounds::new(2), &HashMap::new(), &[], 1.5, "db");
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["gridSideSize"], 2);
        assert_eq!(json["totalGridSize"], 4);
        assert_eq!(json["offlineTime"], 1.5);
        assert!(json.get("simulationNumberId").is_none());
    }
}

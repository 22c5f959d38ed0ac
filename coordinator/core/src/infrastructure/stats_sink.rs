// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Stats sinks for finished runs.
//!
//! - [`LoggingStatsSink`] writes the run to the log as one JSON record.
//! - [`JsonFileStatsSink`] appends the run to a JSON array on disk, numbering
//!   each entry by its position in the file.

use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::domain::stats::{SimulationStats, StatsSink};

#[derive(Debug, Default, Clone)]
pub struct LoggingStatsSink;

#[async_trait]
impl StatsSink for LoggingStatsSink {
    async fn record(&self, stats: &SimulationStats) -> anyhow::Result<()> {
        let json = serde_json::to_string(stats)?;
        info!(
            db = %stats.db_name,
            agents = stats.agents_stats.len(),
            exploration_time = stats.exploration_time,
            stats = %json,
            "Simulation stats recorded"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JsonFileStatsSink {
    path: PathBuf,
}

impl JsonFileStatsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_existing(&self) -> anyhow::Result<Vec<SimulationStats>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse stats file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Stats file does not exist, creating it");
                Ok(Vec::new())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read stats file {}", self.path.display())),
        }
    }
}

#[async_trait]
impl StatsSink for JsonFileStatsSink {
    async fn record(&self, stats: &SimulationStats) -> anyhow::Result<()> {
        let mut simulations = self.load_existing().await?;

        let mut entry = stats.clone();
        entry.simulation_number_id = Some(simulations.len() as u64);
        simulations.push(entry);

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(&simulations)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write stats file {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            simulation = simulations.len() - 1,
            "Simulation stats appended"
        );
        Ok(())
    }
}

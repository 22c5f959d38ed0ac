// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `gridswarm explore` - run this process's agent to completion
//!
//! Builds the configured backend, starts its background services, registers
//! the agent and runs one exploration. Ctrl+C or SIGTERM cancels the run and
//! stops the background services.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gridswarm_core::application::{create_grid_backend, create_stats_sink};
use gridswarm_core::domain::config::GridConfig;
use gridswarm_core::infrastructure::EventBus;
use gridswarm_swarm::application::Explorer;
use gridswarm_swarm::domain::{ExplorationConfig, ExplorationSummary};

use crate::telemetry::shutdown_signal;

#[derive(Args, Debug, Default)]
pub struct ExploreArgs {
    /// Agent name (overrides config and AGENT_NAME)
    #[arg(long)]
    pub agent_name: Option<String>,

    /// Grid side length (overrides config and SIZE)
    #[arg(long)]
    pub grid_size: Option<u32>,

    /// Pause after each claim, in milliseconds (overrides config and DELAY)
    #[arg(long)]
    pub delay_ms: Option<u64>,
}

impl ExploreArgs {
    pub fn apply(&self, config: &mut GridConfig) {
        if let Some(name) = &self.agent_name {
            config.agent_name = name.clone();
        }
        if let Some(size) = self.grid_size {
            config.grid_size = size;
        }
        if let Some(delay) = self.delay_ms {
            config.delay_ms = delay;
        }
    }
}

pub async fn execute(args: ExploreArgs, config_override: Option<PathBuf>) -> Result<()> {
    let mut config = GridConfig::load_or_default(config_override).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Configuration validation failed")?;

    let shutdown = CancellationToken::new();
    let backend = create_grid_backend(&config, shutdown.clone())
        .await
        .context("Failed to initialize grid backend")?;

    let bus = Arc::new(EventBus::with_default_capacity());
    let background = backend.start_background(&config, bus.clone(), shutdown.clone());

    let explorer = Explorer::new(
        config.agent_id(),
        backend.store(),
        config.bounds(),
        ExplorationConfig::from(&config),
    )
    .with_stats_sink(create_stats_sink(&config))
    .with_shutdown_token(shutdown.clone());

    info!(
        agent = %config.agent_name,
        backend = config.backend.kind(),
        grid_size = config.grid_size,
        "Starting exploration"
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                warn!("Shutdown requested, cancelling exploration");
                signal_token.cancel();
            }
            _ = signal_token.cancelled() => {}
        }
    });

    let result = async {
        explorer.register().await?;
        explorer.run().await
    }
    .await;

    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    let summary = result.context("Exploration failed")?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ExplorationSummary) {
    let stats = &summary.stats;
    println!("{}", "✓ Exploration finished".green());
    println!("  Grid: {0}x{0} on {1}", stats.grid_side_size, stats.db_name);
    println!(
        "  Claims: {} ({} teleports, {} refused, {} failed)",
        summary.report.claimed, summary.report.teleports, summary.report.rejected, summary.report.failed
    );
    println!("  Exploration time: {:.2}s", stats.exploration_time);
    println!();
    println!("{}", "Agents:".bold());
    for agent in &stats.agents_stats {
        println!(
            "  {:<20} {:>6} tiles  {:>8.2}s",
            agent.name, agent.tiles_explored, agent.duration
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_config() {
        let mut config = GridConfig::default();
        let args = ExploreArgs {
            agent_name: Some("scout-1".to_string()),
            grid_size: Some(8),
            delay_ms: None,
        };
        args.apply(&mut config);

        assert_eq!(config.agent_name, "scout-1");
        assert_eq!(config.grid_size, 8);
        assert_eq!(config.delay_ms, 1000);
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Grid maintenance commands
//!
//! Commands: count, reset, init, stats

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gridswarm_core::application::{create_grid_backend, GridBackend};
use gridswarm_core::domain::config::GridConfig;
use gridswarm_core::domain::stats::SimulationStats;

#[derive(Subcommand)]
pub enum GridCommand {
    /// Count discovered cells
    Count,

    /// Delete every cell record
    Reset {
        /// Skip the confirmation guard
        #[arg(long)]
        yes: bool,
    },

    /// Create every cell as an undiscovered document (eventual backend only)
    Init,

    /// Print simulation stats for the current grid as JSON
    Stats,
}

pub async fn handle_command(command: GridCommand, config_override: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_override)?;
    let backend = open_backend(&config).await?;

    match command {
        GridCommand::Count => count(&config, &backend).await,
        GridCommand::Reset { yes } => reset(&backend, yes).await,
        GridCommand::Init => init(&backend).await,
        GridCommand::Stats => stats(&config, &backend).await,
    }
}

/// Build the backend without background loops. A strong backend gets one
/// health check so maintenance runs against the primary when it is healthy.
async fn open_backend(config: &GridConfig) -> Result<GridBackend> {
    let backend = create_grid_backend(config, CancellationToken::new())
        .await
        .context("Failed to initialize grid backend")?;

    if let GridBackend::Strong { store, controller } = &backend {
        let outcome = controller.health_cycle().await;
        info!(?outcome, mode = %store.mode(), "Selected strong backend handle");
    }
    Ok(backend)
}

async fn count(config: &GridConfig, backend: &GridBackend) -> Result<()> {
    let discovered = backend.store().count_cells().await?;
    let total = config.bounds().total_cells();
    println!(
        "{} / {} cells discovered ({:.1}%)",
        discovered,
        total,
        discovered as f64 * 100.0 / total as f64
    );
    Ok(())
}

async fn reset(backend: &GridBackend, confirmed: bool) -> Result<()> {
    if !confirmed {
        anyhow::bail!("Refusing to reset the grid without --yes");
    }
    let removed = backend.store().reset_grid().await?;
    println!("{}", format!("✓ Grid reset ({} cells removed)", removed).green());
    Ok(())
}

async fn init(backend: &GridBackend) -> Result<()> {
    match backend {
        GridBackend::Eventual(store) => {
            let created = store.init_grid().await?;
            println!("{}", format!("✓ Grid initialized ({} cells created)", created).green());
        }
        _ => {
            println!(
                "{}",
                "Nothing to do: this backend creates cells on first claim".yellow()
            );
        }
    }
    Ok(())
}

async fn stats(config: &GridConfig, backend: &GridBackend) -> Result<()> {
    let store = backend.store();
    let counts = store.claim_counts_by_agent().await?;
    let agents = store.find_all_agents().await?;
    let stats = SimulationStats::compute(
        config.bounds(),
        &counts,
        &agents,
        config.offline_time_secs,
        store.database_name(),
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the gridswarm CLI

pub mod config;
pub mod explore;
pub mod grid;

pub use self::config::ConfigCommand;
pub use self::explore::ExploreArgs;
pub use self::grid::GridCommand;

use anyhow::{Context, Result};
use gridswarm_core::domain::config::GridConfig;
use std::path::PathBuf;

/// Discover and validate the configuration. Environment overrides are applied
/// during loading.
pub fn load_config(config_override: Option<PathBuf>) -> Result<GridConfig> {
    let config = GridConfig::load_or_default(config_override).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # gridswarm Agent Process
//!
//! The `gridswarm` binary runs one exploring agent against a shared grid
//! store. Many copies run side by side, each with its own `AGENT_NAME`,
//! against the same backend.
//!
//! ## Commands
//!
//! - `gridswarm explore` - Run this agent to completion and record stats
//! - `gridswarm grid count|reset|init|stats` - Maintain the configured backend
//! - `gridswarm config show|validate|generate` - Configuration management

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gridswarm_cli::commands::{self, ConfigCommand, ExploreArgs, GridCommand};
use gridswarm_cli::telemetry::{init_logging, init_metrics, LogFormat};

/// gridswarm - Cooperative grid exploration over a shared store
#[derive(Parser)]
#[command(name = "gridswarm")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "GRIDSWARM_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "GRIDSWARM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, env = "GRIDSWARM_LOG_FORMAT", value_enum, default_value = "compact")]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this port
    #[arg(long, global = true, env = "GRIDSWARM_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run this agent's exploration to completion
    #[command(name = "explore")]
    Explore(ExploreArgs),

    /// Grid maintenance
    #[command(name = "grid")]
    Grid {
        #[command(subcommand)]
        command: GridCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Container deployments pass settings through a .env file
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format)?;
    if let Some(port) = cli.metrics_port {
        init_metrics(port)?;
    }

    match cli.command {
        Commands::Explore(args) => commands::explore::execute(args, cli.config).await,
        Commands::Grid { command } => commands::grid::handle_command(command, cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_explore_with_global_flags() {
        let cli = Cli::try_parse_from([
            "gridswarm",
            "explore",
            "--agent-name",
            "scout",
            "--log-format",
            "json",
            "--metrics-port",
            "9100",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.metrics_port, Some(9100));
        match cli.command {
            Commands::Explore(args) => assert_eq!(args.agent_name.as_deref(), Some("scout")),
            _ => panic!("expected explore"),
        }
    }
}

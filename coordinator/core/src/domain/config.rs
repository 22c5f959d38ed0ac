// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Grid Configuration Types
//
// Defines the configuration schema for a gridswarm agent process:
// - Agent identity and pacing (name, delay, offline time)
// - Grid size
// - Storage backend selection (in-memory, strong, eventual)
// - Failover, replication and conflict-resolution timing

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::agent::AgentId;
use crate::domain::cell::GridBounds;

/// Top-level configuration for one agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Agent identifier; also the conflict-resolver identity on eventual backends.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Side length of the square grid.
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,

    /// Pause after every claim attempt, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Interval between termination-barrier polls, in milliseconds.
    #[serde(default = "default_barrier_poll_interval_ms")]
    pub barrier_poll_interval_ms: u64,

    /// Seconds the primary cluster was kept offline during a run. Reported in stats only.
    #[serde(default)]
    pub offline_time_secs: f64,

    /// Stats label for the run.
    #[serde(default = "default_simulation_name")]
    pub simulation_name: String,

    /// Directory holding `exploration-{simulation_name}.json`. Stats are only
    /// logged when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_dir: Option<PathBuf>,

    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default)]
    pub failover: FailoverSettings,

    #[serde(default)]
    pub conflicts: ConflictSettings,
}

/// Which persistence backend the process talks to. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageBackend {
    /// Single-process store; nothing survives a restart.
    #[default]
    InMemory,
    /// Replicated PostgreSQL cluster plus a standalone fallback instance.
    Strong {
        primary_url: String,
        standalone_url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
    /// CouchDB database. `url` includes the database path.
    Eventual {
        url: String,
        #[serde(default = "default_couch_user")]
        user: String,
        #[serde(default = "default_couch_password")]
        password: String,
    },
}

impl StorageBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageBackend::InMemory => "memory",
            StorageBackend::Strong { .. } => "strong",
            StorageBackend::Eventual { .. } => "eventual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverSettings {
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_replication_interval_ms")]
    pub replication_interval_ms: u64,
    /// Upper bound on one health probe before it counts as a failure.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Healthy members needed to run on the primary cluster.
    #[serde(default = "default_healthy_quorum")]
    pub healthy_quorum: usize,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_health_check_interval_ms(),
            replication_interval_ms: default_replication_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            healthy_quorum: default_healthy_quorum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSettings {
    #[serde(default = "default_conflict_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ConflictSettings {
    fn default() -> Self {
        Self {
            backoff_ms: default_conflict_backoff_ms(),
        }
    }
}

fn default_agent_name() -> String {
    "Agent".to_string()
}

fn default_grid_size() -> u32 {
    40
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_barrier_poll_interval_ms() -> u64 {
    5000
}

fn default_simulation_name() -> String {
    "default".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_couch_user() -> String {
    "admin".to_string()
}

fn default_couch_password() -> String {
    "password".to_string()
}

fn default_health_check_interval_ms() -> u64 {
    3000
}

fn default_replication_interval_ms() -> u64 {
    5000
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_healthy_quorum() -> usize {
    3
}

fn default_conflict_backoff_ms() -> u64 {
    5000
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            grid_size: default_grid_size(),
            delay_ms: default_delay_ms(),
            barrier_poll_interval_ms: default_barrier_poll_interval_ms(),
            offline_time_secs: 0.0,
            simulation_name: default_simulation_name(),
            results_dir: None,
            backend: StorageBackend::default(),
            failover: FailoverSettings::default(),
            conflicts: ConflictSettings::default(),
        }
    }
}

impl GridConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. GRIDSWARM_CONFIG_PATH environment variable
    /// 2. ./gridswarm-config.yaml (working directory)
    /// 3. ~/.gridswarm/config.yaml (user home)
    /// 4. /etc/gridswarm/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("GRIDSWARM_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./gridswarm-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".gridswarm").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/gridswarm/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply process environment overrides (container deployments).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("AGENT_NAME") {
            tracing::info!("Environment override: AGENT_NAME={}", name);
            self.agent_name = name;
        }
        if let Some(name) = lookup("SIMULATION_NAME") {
            self.simulation_name = name;
        }
        if let Some(dir) = lookup("RESULTS_DIR") {
            self.results_dir = Some(PathBuf::from(dir));
        }

        override_number(&lookup, "SIZE", &mut self.grid_size);
        override_number(&lookup, "DELAY", &mut self.delay_ms);
        override_number(&lookup, "BARRIER_POLL_INTERVAL_MS", &mut self.barrier_poll_interval_ms);
        override_number(&lookup, "OFFLINE_TIME", &mut self.offline_time_secs);
        override_number(
            &lookup,
            "HEALTH_CHECK_INTERVAL_MS",
            &mut self.failover.health_check_interval_ms,
        );
        override_number(
            &lookup,
            "REPLICATION_INTERVAL_MS",
            &mut self.failover.replication_interval_ms,
        );
        override_number(&lookup, "CONFLICT_BACKOFF_MS", &mut self.conflicts.backoff_ms);

        if let Some(kind) = lookup("DB_BACKEND") {
            match kind.to_lowercase().as_str() {
                "memory" | "in_memory" => self.backend = StorageBackend::InMemory,
                "strong" | "postgres" => {
                    if !matches!(self.backend, StorageBackend::Strong { .. }) {
                        self.backend = StorageBackend::Strong {
                            primary_url: String::new(),
                            standalone_url: String::new(),
                            max_connections: default_max_connections(),
                        };
                    }
                }
                "eventual" | "couch" | "couchdb" => {
                    if !matches!(self.backend, StorageBackend::Eventual { .. }) {
                        self.backend = StorageBackend::Eventual {
                            url: "http://localhost:5984/v2grid".to_string(),
                            user: default_couch_user(),
                            password: default_couch_password(),
                        };
                    }
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for DB_BACKEND: '{}'. Expected memory/strong/eventual. Ignoring.",
                        kind
                    );
                }
            }
        }

        match &mut self.backend {
            StorageBackend::InMemory => {}
            StorageBackend::Strong {
                primary_url,
                standalone_url,
                ..
            } => {
                if let Some(uri) = lookup("REPL_URI") {
                    *primary_url = uri;
                }
                if let Some(uri) = lookup("STANDALONE_URI") {
                    *standalone_url = uri;
                }
            }
            StorageBackend::Eventual { url, user, password } => {
                if let Some(value) = lookup("COUCHDB_URL") {
                    *url = value;
                }
                if let Some(value) = lookup("COUCHDB_USER") {
                    *user = value;
                }
                if let Some(value) = lookup("COUCHDB_PASSWORD") {
                    *password = value;
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_name.trim().is_empty() {
            anyhow::bail!("agent_name cannot be empty");
        }

        if self.grid_size == 0 {
            anyhow::bail!("grid_size must be at least 1");
        }

        if self.failover.healthy_quorum == 0 {
            anyhow::bail!("failover.healthy_quorum must be at least 1");
        }

        match &self.backend {
            StorageBackend::InMemory => {}
            StorageBackend::Strong {
                primary_url,
                standalone_url,
                ..
            } => {
                if primary_url.is_empty() {
                    anyhow::bail!("backend.primary_url is required for the strong backend (REPL_URI)");
                }
                if standalone_url.is_empty() {
                    anyhow::bail!(
                        "backend.standalone_url is required for the strong backend (STANDALONE_URI)"
                    );
                }
            }
            StorageBackend::Eventual { url, .. } => {
                if url.is_empty() {
                    anyhow::bail!("backend.url is required for the eventual backend (COUCHDB_URL)");
                }
            }
        }

        Ok(())
    }

    pub fn agent_id(&self) -> AgentId {
        AgentId::new(self.agent_name.clone())
    }

    pub fn bounds(&self) -> GridBounds {
        GridBounds::new(self.grid_size)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn barrier_poll_interval(&self) -> Duration {
        Duration::from_millis(self.barrier_poll_interval_ms)
    }

    /// Stats file for this run, when a results directory is configured.
    pub fn results_path(&self) -> Option<PathBuf> {
        self.results_dir
            .as_ref()
            .map(|dir| dir.join(format!("exploration-{}.json", self.simulation_name)))
    }
}

impl FailoverSettings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn replication_interval(&self) -> Duration {
        Duration::from_millis(self.replication_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl ConflictSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

fn override_number<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => {
                tracing::info!("Environment override: {}={}", key, value);
                *target = value;
            }
            Err(_) => {
                tracing::warn!("Invalid value for {}: '{}'. Ignoring.", key, raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = GridConfig::default();
        assert_eq!(config.grid_size, 40);
        assert_eq!(config.delay(), Duration::from_millis(1000));
        assert_eq!(config.failover.health_check_interval(), Duration::from_secs(3));
        assert_eq!(config.failover.replication_interval(), Duration::from_secs(5));
        assert_eq!(config.failover.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.failover.healthy_quorum, 3);
        assert_eq!(config.conflicts.backoff(), Duration::from_secs(5));
        assert_eq!(config.backend, StorageBackend::InMemory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
agent_name: "A"
grid_size: 10
backend:
  type: strong
  primary_url: "postgres://primary/grid"
  standalone_url: "postgres://standalone/grid"
failover:
  health_check_interval_ms: 1000
"#;
        let config = GridConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.agent_name, "A");
        assert_eq!(config.grid_size, 10);
        assert_eq!(config.failover.health_check_interval_ms, 1000);
        assert_eq!(config.failover.replication_interval_ms, 5000);
        match &config.backend {
            StorageBackend::Strong { max_connections, .. } => assert_eq!(*max_connections, 10),
            other => panic!("unexpected backend {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "agent_name: from-file\ngrid_size: 7").unwrap();

        let config = GridConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.agent_name, "from-file");
        assert_eq!(config.bounds().total_cells(), 49);
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(GridConfig::load_or_default(Some(missing)).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("AGENT_NAME", "B"),
            ("SIZE", "3"),
            ("DELAY", "0"),
            ("DB_BACKEND", "eventual"),
            ("COUCHDB_URL", "http://couch:5984/grid"),
            ("CONFLICT_BACKOFF_MS", "250"),
        ]);
        let mut config = GridConfig::default();
        config.apply_overrides_from(|k| vars.get(k).cloned());

        assert_eq!(config.agent_name, "B");
        assert_eq!(config.grid_size, 3);
        assert_eq!(config.delay_ms, 0);
        assert_eq!(config.conflicts.backoff_ms, 250);
        match &config.backend {
            StorageBackend::Eventual { url, user, .. } => {
                assert_eq!(url, "http://couch:5984/grid");
                assert_eq!(user, "admin");
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_results_path_uses_simulation_name() {
        let vars = env(&[("RESULTS_DIR", "/opt/app"), ("SIMULATION_NAME", "run-7")]);
        let mut config = GridConfig::default();
        assert_eq!(config.results_path(), None);

        config.apply_overrides_from(|k| vars.get(k).cloned());
        assert_eq!(
            config.results_path(),
            Some(PathBuf::from("/opt/app/exploration-run-7.json"))
        );
    }

    #[test]
    fn test_invalid_number_override_is_ignored() {
        let vars = env(&[("SIZE", "forty")]);
        let mut config = GridConfig::default();
        config.apply_overrides_from(|k| vars.get(k).cloned());
        assert_eq!(config.grid_size, 40);
    }

    #[test]
    fn test_validation() {
        let mut config = GridConfig::default();
        config.agent_name = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = GridConfig::default();
        config.grid_size = 0;
        assert!(config.validate().is_err());

        let vars = env(&[("DB_BACKEND", "strong"), ("REPL_URI", "postgres://p/grid")]);
        let mut config = GridConfig::default();
        config.apply_overrides_from(|k| vars.get(k).cloned());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("standalone_url"));
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Builds the configured grid backend and its background services. The
//! backend is chosen once here and never replaced; only the strong backend's
//! internal primary/standalone mode changes afterwards.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::conflict_resolver::ConflictResolver;
use crate::application::failover_controller::{FailoverController, FailoverControllerConfig};
use crate::application::notification_bridge::NotificationBridge;
use crate::domain::config::{GridConfig, StorageBackend};
use crate::domain::events::PublishSink;
use crate::domain::repository::{GridStore, ReplicaStore};
use crate::domain::stats::StatsSink;
use crate::infrastructure::couch::CouchClient;
use crate::infrastructure::health_probe::PostgresClusterProbe;
use crate::infrastructure::repositories::failover::PostgresConnector;
use crate::infrastructure::stats_sink::{JsonFileStatsSink, LoggingStatsSink};
use crate::infrastructure::repositories::{
    BackendConnector, BackendMode, CouchGridStore, FailoverGridStore, InMemoryGridStore,
};

/// A constructed backend, with the handles its background services need.
pub enum GridBackend {
    InMemory(Arc<InMemoryGridStore>),
    Strong {
        store: Arc<FailoverGridStore>,
        controller: Arc<FailoverController>,
    },
    Eventual(Arc<CouchGridStore>),
}

impl GridBackend {
    /// The store agents talk to.
    pub fn store(&self) -> Arc<dyn GridStore> {
        match self {
            GridBackend::InMemory(store) => store.clone(),
            GridBackend::Strong { store, .. } => store.clone(),
            GridBackend::Eventual(store) => store.clone(),
        }
    }

    /// Spawn the backend's background loops and its change-feed bridge.
    /// Everything stops when `shutdown` is cancelled.
    pub fn start_background(
        &self,
        config: &GridConfig,
        sink: Arc<dyn PublishSink>,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let bridge = Arc::new(NotificationBridge::new(sink).with_shutdown_token(shutdown.clone()));
        let mut handles = Vec::new();

        match self {
            GridBackend::InMemory(store) => {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    match store.watch().await {
                        Ok(stream) => {
                            bridge.forward(stream).await;
                        }
                        Err(e) => tracing::warn!("In-memory change feed unavailable: {}", e),
                    }
                }));
            }
            GridBackend::Strong { store, controller } => {
                handles.push(controller.clone().start());
                handles.push(bridge.start_following(store.clone()));
            }
            GridBackend::Eventual(store) => {
                let resolver = Arc::new(
                    ConflictResolver::new(store.clone(), config.agent_id(), config.conflicts.backoff())
                        .with_shutdown_token(shutdown.clone()),
                );
                handles.push(resolver.start());

                let feed_store = store.clone();
                handles.push(tokio::spawn(async move {
                    match feed_store.watch().await {
                        Ok(stream) => {
                            bridge.forward(stream).await;
                        }
                        Err(e) => tracing::warn!("[CouchDB] Failed to read replication changes feed: {}", e),
                    }
                }));
            }
        }
        handles
    }
}

/// Build the backend named by `config.backend`.
///
/// Strong: the standalone instance must be reachable at startup; the primary
/// pool is opened lazily and promoted by the first healthy probe.
pub async fn create_grid_backend(
    config: &GridConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<GridBackend> {
    let bounds = config.bounds();

    match &config.backend {
        StorageBackend::InMemory => {
            info!("Using in-memory grid store");
            Ok(GridBackend::InMemory(Arc::new(InMemoryGridStore::new(bounds))))
        }
        StorageBackend::Strong {
            primary_url,
            standalone_url,
            max_connections,
        } => {
            let connector = Arc::new(PostgresConnector::new(
                primary_url.clone(),
                standalone_url.clone(),
                bounds,
                *max_connections,
            ));
            let standalone = connector
                .connect_standalone()
                .await
                .map_err(|e| anyhow::anyhow!("Standalone database unreachable: {}", e))?;
            let primary = connector.lazy_primary()?;

            let store = Arc::new(
                FailoverGridStore::new(primary, standalone, BackendMode::Standalone).with_label("postgres"),
            );
            let probe = Arc::new(PostgresClusterProbe::new(
                primary_url.clone(),
                config.failover.probe_timeout(),
            ));
            let controller = Arc::new(
                FailoverController::new(
                    store.clone(),
                    probe,
                    connector,
                    FailoverControllerConfig::from(&config.failover),
                )
                .with_shutdown_token(shutdown),
            );
            info!("Using strong-consistency PostgreSQL backend (starting standalone)");
            Ok(GridBackend::Strong { store, controller })
        }
        StorageBackend::Eventual { url, user, password } => {
            let client = CouchClient::new(url.clone(), user.clone(), password.clone())?;
            let store = CouchGridStore::new(client, bounds);
            store.ensure_setup().await?;
            info!(url = %url, "Using eventual-consistency CouchDB backend");
            Ok(GridBackend::Eventual(Arc::new(store)))
        }
    }
}

/// Stats go to the results file when one is configured, otherwise to the log.
pub fn create_stats_sink(config: &GridConfig) -> Arc<dyn StatsSink> {
    match config.results_path() {
        Some(path) => {
            info!(path = %path.display(), "Simulation stats will be appended to file");
            Arc::new(JsonFileStatsSink::new(path))
        }
        None => Arc::new(LoggingStatsSink),
    }
}

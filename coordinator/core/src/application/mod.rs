// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Application Layer
//!
//! Background services that keep the stores consistent, plus the factory
//! that builds the configured backend.
//!
//! | Service | Runs against | Loop |
//! |---------|--------------|------|
//! | [`failover_controller::FailoverController`] | strong backend | health poll + mirror job |
//! | [`conflict_resolver::ConflictResolver`] | eventual backend | long-poll conflict scan |
//! | [`notification_bridge::NotificationBridge`] | any backend | change feed -> publish sink |

pub mod conflict_resolver;
pub mod failover_controller;
pub mod notification_bridge;
pub mod repository_factory;

pub use conflict_resolver::{ConflictResolver, ConflictScan};
pub use failover_controller::{FailoverController, FailoverControllerConfig, HealthOutcome};
pub use notification_bridge::NotificationBridge;
pub use repository_factory::{create_grid_backend, create_stats_sink, GridBackend};

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod couch;
pub mod db;
pub mod event_bus;
pub mod health_probe;
pub mod repositories;
pub mod stats_sink;

pub use event_bus::EventBus;

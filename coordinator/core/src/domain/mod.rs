// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Types and rules for the shared grid, the store contracts and the
//! configuration schema.

pub mod agent;
pub mod cell;
pub mod cluster;
pub mod config;
pub mod conflict;
pub mod events;
pub mod repository;
pub mod stats;

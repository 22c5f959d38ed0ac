// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `gridswarm-swarm` - Per-Agent Exploration
//!
//! Drives one agent across the shared grid through the store contract from
//! `gridswarm-core`. Many processes run this concurrently against the same
//! backend; they coordinate only through the store's claim atomicity.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `ExplorerState`, `ExplorationConfig`, `ExplorationError` |
//! | [`application`] | Application | `ReservationProtocol`, `Explorer` |
//!
//! ## Key Concepts
//!
//! - **Frontier walk**: move to a random undiscovered neighbour of the current cell.
//! - **Teleport**: with no frontier left, jump to a random undiscovered cell anywhere.
//! - **Barrier**: after finishing, wait until no agent reports `is_exploring`
//!   before computing stats.

pub mod domain;
pub mod application;

pub use domain::*;

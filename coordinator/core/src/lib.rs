// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `gridswarm-core`
//!
//! Storage-side half of the grid exploration system: the cell/agent data model,
//! the [`domain::repository::GridStore`] contract and its three adapters, and the
//! background controllers that keep the stores consistent.
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Cell`, `Agent`, `GridBounds`, change events, conflict merge, stats, config |
//! | [`application`] | Application | failover controller, conflict resolver, notification bridge, store factory |
//! | [`infrastructure`] | Infrastructure | in-memory, PostgreSQL and CouchDB stores, event bus, health probe |
//!
//! Agents never talk to a backend directly; they go through the reservation
//! protocol in `gridswarm-swarm`, which holds an `Arc<dyn GridStore>`.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;

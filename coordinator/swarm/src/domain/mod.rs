// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Exploration Domain Layer
//!
//! Pure types for the per-agent state machine. No I/O.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`exploration`] | `ExplorerState`, `ExplorationConfig`, `ExplorationError`, `ExplorationReport` |

pub mod exploration;

pub use exploration::*;

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Layer
//!
//! | Service | Purpose |
//! |---------|---------|
//! | [`reservation::ReservationProtocol`] | claim a cell through whatever store is configured |
//! | [`explorer::Explorer`] | one agent's run: walk, teleport, barrier, stats |

pub mod explorer;
pub mod reservation;

pub use explorer::Explorer;
pub use reservation::{ReservationOutcome, ReservationProtocol};

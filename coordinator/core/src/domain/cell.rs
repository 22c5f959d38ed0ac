// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cell Aggregate
//!
//! A cell is one grid coordinate with a claim counter and the set of agents that
//! claimed it. A cell is *undiscovered* while `claim_count == 0`; an absent record
//! is treated the same way, since records are created on first claim.
//!
//! The persisted primary key is always `"{x}-{y}"` (see [`CellKey`]).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Primary key of a persisted cell record: `"{x}-{y}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellKey(pub String);

impl CellKey {
    pub fn new(x: u32, y: u32) -> Self {
        Self(format!("{}-{}", x, y))
    }

    /// Parse `"{x}-{y}"` back into coordinates.
    pub fn coordinates(&self) -> Option<(u32, u32)> {
        let (x, y) = self.0.split_once('-')?;
        Some((x.parse().ok()?, y.parse().ok()?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One grid coordinate and its claim history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub x: u32,
    pub y: u32,
    /// Number of successful claims ever applied. Never decreases outside a grid reset.
    pub claim_count: u64,
    /// Deduplicated agent identifiers; order carries no meaning.
    #[serde(default)]
    pub claimants: Vec<String>,
}

impl Cell {
    /// An unclaimed cell at `(x, y)`.
    pub fn undiscovered(x: u32, y: u32) -> Self {
        Self {
            x,
            y,
            claim_count: 0,
            claimants: Vec::new(),
        }
    }

    pub fn key(&self) -> CellKey {
        CellKey::new(self.x, self.y)
    }

    pub fn is_discovered(&self) -> bool {
        self.claim_count > 0
    }

    /// True when this value is the result of the claim that moved the cell `0 -> 1`.
    pub fn is_first_discovery(&self) -> bool {
        self.claim_count == 1
    }

    /// Apply one claim by `agent_id`: increment and add to the claimant set.
    pub fn apply_claim(&mut self, agent_id: &str) {
        self.claim_count += 1;
        self.add_claimant(agent_id);
    }

    pub fn add_claimant(&mut self, agent_id: &str) {
        if !self.claimants.iter().any(|a| a == agent_id) {
            self.claimants.push(agent_id.to_string());
        }
    }

    pub fn claimant_set(&self) -> HashSet<&str> {
        self.claimants.iter().map(String::as_str).collect()
    }
}

/// Square grid of side `size`; valid coordinates are `0..size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBounds {
    pub size: u32,
}

impl GridBounds {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn total_cells(&self) -> u64 {
        u64::from(self.size) * u64::from(self.size)
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.size) && y < i64::from(self.size)
    }

    /// The up-to-8 cells at Chebyshev distance 1 from `(x, y)`, clipped to the grid.
    pub fn neighbors(&self, x: u32, y: u32) -> Vec<(u32, u32)> {
        let mut out = Vec::with_capacity(8);
        for dx in -1i64..=1 {
            for dy in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = i64::from(x) + dx;
                let ny = i64::from(y) + dy;
                if self.contains(nx, ny) {
                    out.push((nx as u32, ny as u32));
                }
            }
        }
        out
    }

    /// Every coordinate of the grid, row-major.
    pub fn all_coordinates(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.size).flat_map(move |x| (0..self.size).map(move |y| (x, y)))
    }

    /// Coordinates with no discovered record, given the set of discovered keys.
    pub fn undiscovered(&self, discovered: &HashSet<(u32, u32)>) -> Vec<(u32, u32)> {
        self.all_coordinates()
            .filter(|c| !discovered.contains(c))
            .collect()
    }

    /// Neighbours of `(x, y)` that are not in `discovered`, as zero-claim cells.
    pub fn undiscovered_neighbors(
        &self,
        x: u32,
        y: u32,
        discovered: &HashSet<(u32, u32)>,
    ) -> Vec<Cell> {
        self.neighbors(x, y)
            .into_iter()
            .filter(|c| !discovered.contains(c))
            .map(|(nx, ny)| Cell::undiscovered(nx, ny))
            .collect()
    }
}

/// Uniformly pick one element. The RNG never lives across an await point.
pub fn choose_uniform<T: Clone>(items: &[T]) -> Option<T> {
    use rand::seq::IndexedRandom;
    items.choose(&mut rand::rng()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_key_format_and_parse() {
        let key = CellKey::new(12, 3);
        assert_eq!(key.as_str(), "12-3");
        assert_eq!(key.coordinates(), Some((12, 3)));
        assert_eq!(CellKey("garbage".to_string()).coordinates(), None);
    }

    #[test]
    fn test_apply_claim_deduplicates_claimants() {
        let mut cell = Cell::undiscovered(0, 0);
        cell.apply_claim("A");
        assert!(cell.is_first_discovery());
        cell.apply_claim("A");
        cell.apply_claim("B");
        assert_eq!(cell.claim_count, 3);
        assert_eq!(cell.claimants, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_corner_has_three_neighbors() {
        let grid = GridBounds::new(3);
        let mut n = grid.neighbors(0, 0);
        n.sort();
        assert_eq!(n, vec![(0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_center_has_eight_neighbors() {
        let grid = GridBounds::new(3);
        assert_eq!(grid.neighbors(1, 1).len(), 8);
    }

    #[test]
    fn test_single_cell_grid_has_no_neighbors() {
        assert!(GridBounds::new(1).neighbors(0, 0).is_empty());
    }

    #[test]
    fn test_undiscovered_excludes_discovered() {
        let grid = GridBounds::new(2);
        let discovered: HashSet<_> = [(0, 0), (1, 1)].into_iter().collect();
        let mut left = grid.undiscovered(&discovered);
        left.sort();
        assert_eq!(left, vec![(0, 1), (1, 0)]);

        let neighbors = grid.undiscovered_neighbors(0, 0, &discovered);
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.iter().all(|c| c.claim_count == 0));
    }

    #[test]
    fn test_choose_uniform_empty() {
        let empty: Vec<u32> = vec![];
        assert_eq!(choose_uniform(&empty), None);
        assert_eq!(choose_uniform(&[7]), Some(7));
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype shared by the
//! strong-consistency store handles and the cluster health probe.
//!
//! The pool connects lazily so a process can start while the primary cluster
//! is down and fall back to the standalone instance.

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect eagerly; fails if the server is unreachable.
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = Self::options(max_connections)
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    /// Build the pool without opening a connection.
    pub fn lazy(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = Self::options(max_connections).connect_lazy(connection_string)?;
        Ok(Self { pool })
    }

    fn options(max_connections: u32) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(2))
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

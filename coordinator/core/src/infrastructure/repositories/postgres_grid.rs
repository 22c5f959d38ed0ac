// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Grid Store
//!
//! One PostgreSQL handle of the strong-consistency pair: either the primary
//! cluster or the standalone instance. `FailoverGridStore` decides which one
//! receives live traffic.
//!
//! Schema (created by [`PostgresGridStore::ensure_schema`]):
//!
//! | Table | Columns |
//! |-------|---------|
//! | `cells` | `id TEXT PK ("x-y")`, `x INT`, `y INT`, `claim_count BIGINT`, `claimants TEXT[]` |
//! | `agents` | `id TEXT PK`, `is_exploring BOOL`, `start_time TIMESTAMPTZ`, `end_time TIMESTAMPTZ` |
//!
//! A row trigger publishes every mutation on the `grid_changes` channel;
//! [`ReplicaStore::watch`] listens there.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::postgres::{PgListener, PgPool, PgRow};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::domain::agent::{Agent, AgentId, AgentPatch};
use crate::domain::cell::{Cell, CellKey, GridBounds};
use crate::domain::events::{ChangeEvent, ChangeKind, ChangeStream};
use crate::domain::repository::{GridStore, ReplicaStore, StoreError};
use crate::infrastructure::db::Database;

pub const CHANGE_CHANNEL: &str = "grid_changes";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cells (
        id TEXT PRIMARY KEY,
        x INT NOT NULL,
        y INT NOT NULL,
        claim_count BIGINT NOT NULL DEFAULT 0 CHECK (claim_count >= 0),
        claimants TEXT[] NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        is_exploring BOOLEAN NOT NULL DEFAULT FALSE,
        start_time TIMESTAMPTZ,
        end_time TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE OR REPLACE FUNCTION notify_grid_change() RETURNS trigger AS $$
    BEGIN
        PERFORM pg_notify(
            'grid_changes',
            json_build_object(
                'table', TG_TABLE_NAME,
                'op', TG_OP,
                'record', CASE WHEN TG_OP = 'DELETE' THEN row_to_json(OLD) ELSE row_to_json(NEW) END
            )::text
        );
        RETURN NULL;
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS cells_notify ON cells",
    "CREATE TRIGGER cells_notify AFTER INSERT OR UPDATE OR DELETE ON cells FOR EACH ROW EXECUTE FUNCTION notify_grid_change()",
    "DROP TRIGGER IF EXISTS agents_notify ON agents",
    "CREATE TRIGGER agents_notify AFTER INSERT OR UPDATE OR DELETE ON agents FOR EACH ROW EXECUTE FUNCTION notify_grid_change()",
];

#[derive(Clone)]
pub struct PostgresGridStore {
    pool: PgPool,
    bounds: GridBounds,
    label: String,
}

impl PostgresGridStore {
    pub fn new(pool: PgPool, bounds: GridBounds, label: impl Into<String>) -> Self {
        Self {
            pool,
            bounds,
            label: label.into(),
        }
    }

    pub fn from_database(db: &Database, bounds: GridBounds, label: impl Into<String>) -> Self {
        Self::new(db.get_pool().clone(), bounds, label)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and change-notification triggers if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(store = %self.label, "Grid schema ready");
        Ok(())
    }

    async fn discovered_in(
        &self,
        x_range: (u32, u32),
        y_range: (u32, u32),
    ) -> Result<HashSet<(u32, u32)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT x, y FROM cells
            WHERE claim_count > 0 AND x BETWEEN $1 AND $2 AND y BETWEEN $3 AND $4
            "#,
        )
        .bind(x_range.0 as i32)
        .bind(x_range.1 as i32)
        .bind(y_range.0 as i32)
        .bind(y_range.1 as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<i32, _>("x") as u32, row.get::<i32, _>("y") as u32))
            .collect())
    }
}

fn cell_from_row(row: &PgRow) -> Cell {
    let x: i32 = row.get("x");
    let y: i32 = row.get("y");
    let claim_count: i64 = row.get("claim_count");
    let claimants: Vec<String> = row.get("claimants");
    Cell {
        x: x as u32,
        y: y as u32,
        claim_count: claim_count.max(0) as u64,
        claimants,
    }
}

fn agent_from_row(row: &PgRow) -> Agent {
    let id: String = row.get("id");
    let start_time: Option<DateTime<Utc>> = row.get("start_time");
    let end_time: Option<DateTime<Utc>> = row.get("end_time");
    Agent {
        id: AgentId(id),
        is_exploring: row.get("is_exploring"),
        start_time,
        end_time,
    }
}

/// Translate a `grid_changes` notification payload into a change event.
pub(crate) fn event_from_notification(payload: &str) -> ChangeEvent {
    let parsed: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!("Unparseable change notification: {}", e);
            return ChangeEvent::new(
                ChangeKind::DbChange,
                serde_json::Value::String(payload.to_string()),
            );
        }
    };
    let kind = match parsed.get("table").and_then(|t| t.as_str()) {
        Some("cells") => ChangeKind::CellUpdate,
        Some("agents") => ChangeKind::AgentUpdate,
        _ => ChangeKind::DbChange,
    };
    let record = parsed.get("record").cloned().unwrap_or(parsed);
    ChangeEvent::new(kind, record)
}

#[async_trait]
impl GridStore for PostgresGridStore {
    async fn count_cells(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cells")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn find_all_cells(&self) -> Result<Vec<Cell>, StoreError> {
        let rows = sqlx::query("SELECT x, y, claim_count, claimants FROM cells ORDER BY x, y")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(cell_from_row).collect())
    }

    async fn find_all_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let rows = sqlx::query("SELECT id, is_exploring, start_time, end_time FROM agents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(agent_from_row).collect())
    }

    async fn claim_cell(&self, x: u32, y: u32, agent_id: &AgentId) -> Result<Option<Cell>, StoreError> {
        // Single statement: concurrent claimers serialize on the row lock
        let row = sqlx::query(
            r#"
            INSERT INTO cells (id, x, y, claim_count, claimants)
            VALUES ($1, $2, $3, 1, ARRAY[$4::TEXT])
            ON CONFLICT (id) DO UPDATE SET
                claim_count = cells.claim_count + 1,
                claimants = CASE
                    WHEN $4::TEXT = ANY(cells.claimants) THEN cells.claimants
                    ELSE array_append(cells.claimants, $4::TEXT)
                END
            RETURNING x, y, claim_count, claimants
            "#,
        )
        .bind(CellKey::new(x, y).as_str())
        .bind(x as i32)
        .bind(y as i32)
        .bind(agent_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(cell_from_row(&row)))
    }

    async fn pick_undiscovered_cell(&self) -> Result<Option<Cell>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT gx AS x, gy AS y
            FROM generate_series(0, $1::INT - 1) AS gx
            CROSS JOIN generate_series(0, $1::INT - 1) AS gy
            WHERE NOT EXISTS (
                SELECT 1 FROM cells c WHERE c.x = gx AND c.y = gy AND c.claim_count > 0
            )
            ORDER BY random()
            LIMIT 1
            "#,
        )
        .bind(self.bounds.size as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let x: i32 = row.get("x");
            let y: i32 = row.get("y");
            Cell::undiscovered(x as u32, y as u32)
        }))
    }

    async fn undiscovered_neighbors(&self, x: u32, y: u32) -> Result<Vec<Cell>, StoreError> {
        let last = self.bounds.size.saturating_sub(1);
        let discovered = self
            .discovered_in(
                (x.saturating_sub(1), (x + 1).min(last)),
                (y.saturating_sub(1), (y + 1).min(last)),
            )
            .await?;
        Ok(self.bounds.undiscovered_neighbors(x, y, &discovered))
    }

    async fn reset_grid(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM cells").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO agents (id, is_exploring, start_time, end_time)
            VALUES ($1, COALESCE($2, FALSE), $4, $6)
            ON CONFLICT (id) DO UPDATE SET
                is_exploring = COALESCE($2, agents.is_exploring),
                start_time = CASE WHEN $3 THEN $4 ELSE agents.start_time END,
                end_time = CASE WHEN $5 THEN $6 ELSE agents.end_time END
            RETURNING id, is_exploring, start_time, end_time
            "#,
        )
        .bind(id.as_str())
        .bind(patch.is_exploring)
        .bind(patch.start_time.is_some())
        .bind(patch.start_time.flatten())
        .bind(patch.end_time.is_some())
        .bind(patch.end_time.flatten())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(agent_from_row))
    }

    async fn claim_counts_by_agent(&self) -> Result<HashMap<String, u64>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT agent, COUNT(*) AS tiles
            FROM cells, unnest(claimants) AS agent
            WHERE claim_count > 0
            GROUP BY agent
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let agent: String = row.get("agent");
                let tiles: i64 = row.get("tiles");
                (agent, tiles as u64)
            })
            .collect())
    }

    fn database_name(&self) -> String {
        self.label.clone()
    }
}

#[async_trait]
impl ReplicaStore for PostgresGridStore {
    async fn insert_missing_cells(&self, cells: &[Cell]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for cell in cells {
            let result = sqlx::query(
                r#"
                INSERT INTO cells (id, x, y, claim_count, claimants)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(cell.key().as_str())
            .bind(cell.x as i32)
            .bind(cell.y as i32)
            .bind(cell.claim_count as i64)
            .bind(&cell.claimants)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn replace_all(&self, cells: &[Cell], agents: &[Agent]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cells").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM agents").execute(&mut *tx).await?;

        for cell in cells {
            sqlx::query(
                "INSERT INTO cells (id, x, y, claim_count, claimants) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(cell.key().as_str())
            .bind(cell.x as i32)
            .bind(cell.y as i32)
            .bind(cell.claim_count as i64)
            .bind(&cell.claimants)
            .execute(&mut *tx)
            .await?;
        }

        for agent in agents {
            sqlx::query(
                "INSERT INTO agents (id, is_exploring, start_time, end_time) VALUES ($1, $2, $3, $4)",
            )
            .bind(agent.id.as_str())
            .bind(agent.is_exploring)
            .bind(agent.start_time)
            .bind(agent.end_time)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        let label = self.label.clone();

        let stream = listener.into_stream().filter_map(move |item| {
            let label = label.clone();
            async move {
                match item {
                    Ok(notification) => Some(event_from_notification(notification.payload())),
                    Err(e) => {
                        warn!(store = %label, "Change feed error: {}", e);
                        None
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Cluster Probe
//!
//! Opens a short-lived connection to the primary cluster and reports one
//! member per node: the server itself (`primary` unless it is in recovery)
//! and every `pg_stat_replication` entry (`secondary` while streaming).

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Row};
use std::time::Duration;
use tracing::debug;

use crate::domain::cluster::{ClusterHealthProbe, MemberHealth, MemberRole};
use crate::domain::repository::StoreError;

pub struct PostgresClusterProbe {
    url: String,
    timeout: Duration,
}

impl PostgresClusterProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    async fn query_members(&self) -> Result<Vec<MemberHealth>, StoreError> {
        let mut conn = PgConnection::connect(&self.url).await?;

        let in_recovery: bool = sqlx::query_scalar("SELECT pg_is_in_recovery()")
            .fetch_one(&mut conn)
            .await?;
        let self_role = if in_recovery {
            MemberRole::Other("recovering".to_string())
        } else {
            MemberRole::Primary
        };
        let mut members = vec![MemberHealth::new("self", self_role)];

        let rows = sqlx::query(
            r#"
            SELECT COALESCE(application_name, '') AS name,
                   COALESCE(client_addr::TEXT, '') AS addr,
                   COALESCE(state, 'unknown') AS state
            FROM pg_stat_replication
            "#,
        )
        .fetch_all(&mut conn)
        .await?;

        for row in rows {
            let name: String = row.get("name");
            let addr: String = row.get("addr");
            let state: String = row.get("state");
            members.push(MemberHealth::new(
                format!("{}@{}", name, addr),
                role_for_replication_state(&state),
            ));
        }

        conn.close().await?;
        Ok(members)
    }
}

fn role_for_replication_state(state: &str) -> MemberRole {
    match state {
        "streaming" => MemberRole::Secondary,
        other => MemberRole::Other(other.to_string()),
    }
}

#[async_trait]
impl ClusterHealthProbe for PostgresClusterProbe {
    async fn members(&self) -> Result<Vec<MemberHealth>, StoreError> {
        let members = tokio::time::timeout(self.timeout, self.query_members())
            .await
            .map_err(|_| StoreError::Timeout)??;
        debug!(members = members.len(), "Cluster probe complete");
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replication_state_mapping() {
        assert_eq!(role_for_replication_state("streaming"), MemberRole::Secondary);
        assert_eq!(
            role_for_replication_state("catchup"),
            MemberRole::Other("catchup".to_string())
        );
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_an_error() {
        let probe = PostgresClusterProbe::new(
            "postgres://nobody@127.0.0.1:1/none",
            Duration::from_millis(500),
        );
        assert!(probe.members().await.is_err());
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cluster Health
//!
//! Member-level view of the replicated primary cluster, as reported by a
//! side-channel probe. Only members in the primary or secondary role count as
//! healthy; anything else (recovering, catching up, unknown) does not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::repository::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Primary,
    Secondary,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberHealth {
    pub name: String,
    pub role: MemberRole,
}

impl MemberHealth {
    pub fn new(name: impl Into<String>, role: MemberRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.role, MemberRole::Primary | MemberRole::Secondary)
    }
}

pub fn healthy_count(members: &[MemberHealth]) -> usize {
    members.iter().filter(|m| m.is_healthy()).count()
}

/// Queries the primary cluster's member status over a fresh connection.
///
/// Implementations must bound their own runtime; a wedged remote has to come
/// back as an error, not a hang.
#[async_trait]
pub trait ClusterHealthProbe: Send + Sync {
    async fn members(&self) -> Result<Vec<MemberHealth>, StoreError>;
}

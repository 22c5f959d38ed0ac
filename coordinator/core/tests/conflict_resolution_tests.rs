// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for eventual-consistency conflict resolution.
//!
//! Covers the resolver against a recording in-memory conflict store and one
//! full pass against a mocked CouchDB HTTP API:
//! - only the first claimant of the current revision resolves a conflict
//! - the merge adds one claim per losing revision and unions claimants
//! - losing revisions are tombstoned after the merged write
//! - a failing write leaves the conflict for the next scan

use async_trait::async_trait;
use gridswarm_core::application::conflict_resolver::{ConflictResolver, ConflictScan};
use gridswarm_core::domain::agent::AgentId;
use gridswarm_core::domain::cell::{Cell, CellKey, GridBounds};
use gridswarm_core::domain::conflict::{CellConflict, ConflictStore};
use gridswarm_core::domain::repository::StoreError;
use gridswarm_core::infrastructure::couch::CouchClient;
use gridswarm_core::infrastructure::repositories::CouchGridStore;
use mockito::Matcher;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingConflictStore {
    conflicts: Vec<CellConflict>,
    revisions: HashMap<String, Cell>,
    fail_writes: bool,
    waits: AtomicUsize,
    written: Mutex<Vec<(CellKey, Cell)>>,
    tombstoned: Mutex<Vec<(CellKey, Vec<String>)>>,
}

#[async_trait]
impl ConflictStore for RecordingConflictStore {
    async fn wait_for_conflict_changes(&self, _since: Option<String>) -> Result<String, StoreError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok("1".to_string())
    }

    async fn conflicting_cells(&self) -> Result<Vec<CellConflict>, StoreError> {
        Ok(self.conflicts.clone())
    }

    async fn load_revisions(&self, _key: &CellKey, revs: &[String]) -> Result<Vec<Cell>, StoreError> {
        revs.iter()
            .map(|rev| {
                self.revisions
                    .get(rev)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(rev.clone()))
            })
            .collect()
    }

    async fn write_merged(&self, conflict: &CellConflict, merged: &Cell) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Conflict(conflict.current_rev.clone()));
        }
        self.written.lock().push((conflict.key.clone(), merged.clone()));
        Ok(())
    }

    async fn tombstone_revisions(&self, key: &CellKey, revs: &[String]) -> Result<(), StoreError> {
        self.tombstoned.lock().push((key.clone(), revs.to_vec()));
        Ok(())
    }
}

fn cell(x: u32, y: u32, count: u64, claimants: &[&str]) -> Cell {
    Cell {
        x,
        y,
        claim_count: count,
        claimants: claimants.iter().map(|s| s.to_string()).collect(),
    }
}

/// Cell (2,2): A claimed on one replica, B on the other, both from zero.
fn two_replica_store() -> RecordingConflictStore {
    let mut revisions = HashMap::new();
    revisions.insert("1-b".to_string(), cell(2, 2, 1, &["B"]));
    RecordingConflictStore {
        conflicts: vec![CellConflict {
            key: CellKey::new(2, 2),
            current_rev: "2-a".to_string(),
            current: cell(2, 2, 2, &["A"]),
            conflicting_revs: vec!["1-b".to_string()],
        }],
        revisions,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_designated_resolver_merges_and_tombstones() {
    let store = Arc::new(two_replica_store());
    let resolver = ConflictResolver::new(store.clone(), AgentId::new("A"), Duration::from_millis(10));

    assert_eq!(
        resolver.resolve_pending().await.unwrap(),
        ConflictScan { resolved: 1, failed: 0 }
    );

    let written = store.written.lock();
    assert_eq!(written.len(), 1);
    let (key, merged) = &written[0];
    assert_eq!(key.as_str(), "2-2");
    assert_eq!(merged.claim_count, 3);
    assert_eq!(merged.claimants, vec!["A".to_string(), "B".to_string()]);

    let tombstoned = store.tombstoned.lock();
    assert_eq!(tombstoned.as_slice(), &[(CellKey::new(2, 2), vec!["1-b".to_string()])]);
}

#[tokio::test]
async fn test_other_agents_leave_conflict_alone() {
    let store = Arc::new(two_replica_store());
    let resolver = ConflictResolver::new(store.clone(), AgentId::new("B"), Duration::from_millis(10));

    assert_eq!(resolver.resolve_pending().await.unwrap(), ConflictScan::default());
    assert!(store.written.lock().is_empty());
    assert!(store.tombstoned.lock().is_empty());
}

#[tokio::test]
async fn test_failed_write_skips_tombstones() {
    let store = Arc::new(RecordingConflictStore {
        fail_writes: true,
        ..two_replica_store()
    });
    let resolver = ConflictResolver::new(store.clone(), AgentId::new("A"), Duration::from_millis(10));

    assert_eq!(
        resolver.resolve_pending().await.unwrap(),
        ConflictScan { resolved: 0, failed: 1 }
    );
    assert!(store.tombstoned.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_resolution_backs_off_before_next_poll() {
    let store = Arc::new(RecordingConflictStore {
        fail_writes: true,
        ..two_replica_store()
    });
    let resolver = Arc::new(ConflictResolver::new(store.clone(), AgentId::new("A"), Duration::from_millis(100)));
    let token = resolver.shutdown_token();
    let handle = resolver.start();

    // Each pass is a 5ms poll plus the 100ms backoff
    tokio::time::sleep(Duration::from_millis(300)).await;
    token.cancel();
    handle.await.unwrap();

    let polls = store.waits.load(Ordering::SeqCst);
    assert!((2..=4).contains(&polls), "{} polls in 300ms with a 100ms backoff", polls);
}

#[tokio::test]
async fn test_resolver_loop_stops_on_shutdown() {
    let store = Arc::new(two_replica_store());
    let resolver = Arc::new(ConflictResolver::new(store.clone(), AgentId::new("A"), Duration::from_millis(10)));
    let token = resolver.shutdown_token();
    let handle = resolver.start();

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    handle.await.unwrap();

    // The fake store keeps reporting the same conflict, so the loop resolved it repeatedly
    assert!(!store.written.lock().is_empty());
}

#[tokio::test]
async fn test_resolution_against_couch_api() {
    let mut server = mockito::Server::new_async().await;

    let view = server
        .mock("GET", "/grid/_design/conflicts/_view/by_conflicting_cells")
        .with_status(200)
        .with_body(
            json!({
                "total_rows": 1,
                "rows": [{
                    "id": "2-2",
                    "key": "2-2",
                    "value": {
                        "current": {"_id": "2-2", "_rev": "2-a", "type": "cell", "x": 2, "y": 2, "claim_count": 2, "claimants": ["A"]},
                        "conflicts": ["1-b"]
                    }
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let revision = server
        .mock("GET", "/grid/2-2")
        .match_query(Matcher::UrlEncoded("rev".into(), "1-b".into()))
        .with_status(200)
        .with_body(r#"{"_id":"2-2","_rev":"1-b","type":"cell","x":2,"y":2,"claim_count":1,"claimants":["B"]}"#)
        .create_async()
        .await;

    let merged = server
        .mock("PUT", "/grid/2-2")
        .match_body(Matcher::PartialJson(json!({
            "_rev": "2-a",
            "claim_count": 3,
            "claimants": ["A", "B"]
        })))
        .with_status(201)
        .with_body(r#"{"ok":true,"id":"2-2","rev":"3-c"}"#)
        .create_async()
        .await;

    let tombstones = server
        .mock("POST", "/grid/_bulk_docs")
        .match_body(Matcher::PartialJson(json!({
            "docs": [{"_id": "2-2", "_rev": "1-b", "_deleted": true}]
        })))
        .with_status(201)
        .with_body(r#"[{"ok":true,"id":"2-2","rev":"2-d"}]"#)
        .create_async()
        .await;

    let client = CouchClient::new(format!("{}/grid", server.url()), "admin", "password").unwrap();
    let store = Arc::new(CouchGridStore::new(client, GridBounds::new(5)));
    let resolver = ConflictResolver::new(store, AgentId::new("A"), Duration::from_millis(10));

    assert_eq!(resolver.resolve_pending().await.unwrap().resolved, 1);

    view.assert_async().await;
    revision.assert_async().await;
    merged.assert_async().await;
    tombstones.assert_async().await;
}

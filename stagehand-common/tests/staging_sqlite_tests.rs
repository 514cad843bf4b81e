//! SQLite staging backend
//!
//! Each test opens a file database in a temp directory; an in-memory SQLite
//! pool would give every pooled connection its own empty database.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use stagehand_common::staging::{
    ClearTarget, KeyValueStore, SqliteStore, StagingStore, PENDING_METADATA_KEY,
};
use stagehand_common::time::ManualClock;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PendingFields {
    key: String,
    scale: String,
    tempo: u32,
}

fn fields() -> PendingFields {
    PendingFields {
        key: "F#".to_string(),
        scale: "minor".to_string(),
        tempo: 140,
    }
}

async fn open(dir: &TempDir, origin: &str) -> SqliteStore {
    SqliteStore::open(&dir.path().join("staging.db"), origin)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_save_then_load_survives_reopen() {
    let dir = TempDir::new().unwrap();

    let staging = StagingStore::new(Arc::new(open(&dir, "site-a").await));
    assert!(staging.save(PENDING_METADATA_KEY, &fields()).await);
    drop(staging);

    let reopened = StagingStore::new(Arc::new(open(&dir, "site-a").await));
    let loaded: Option<PendingFields> = reopened
        .load(PENDING_METADATA_KEY, Duration::from_secs(60))
        .await;
    assert_eq!(loaded, Some(fields()));
}

#[tokio::test]
async fn test_origins_are_isolated() {
    let dir = TempDir::new().unwrap();
    let a = open(&dir, "site-a").await;
    let b = open(&dir, "site-b").await;

    a.set("shared-key", "from-a".to_string()).await.unwrap();
    assert_eq!(b.get("shared-key").await.unwrap(), None);
    assert_eq!(a.get("shared-key").await.unwrap().as_deref(), Some("from-a"));
    assert_eq!(b.keys().await.unwrap(), Vec::<String>::new());
}

#[tokio::test]
async fn test_set_overwrites() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, "site-a").await;

    store.set("k", "one".to_string()).await.unwrap();
    store.set("k", "two".to_string()).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
    assert_eq!(store.keys().await.unwrap(), vec!["k".to_string()]);
}

#[tokio::test]
async fn test_expired_record_is_removed_from_database() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap());
    let backend = Arc::new(open(&dir, "site-a").await);
    let staging = StagingStore::with_clock(backend.clone(), Arc::new(clock.clone()));

    assert!(staging.save(PENDING_METADATA_KEY, &fields()).await);
    clock.advance_ms(61_000);

    let loaded: Option<PendingFields> = staging
        .load(PENDING_METADATA_KEY, Duration::from_secs(60))
        .await;
    assert!(loaded.is_none());
    assert_eq!(backend.get(PENDING_METADATA_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn test_clear_prefix() {
    let dir = TempDir::new().unwrap();
    let staging = StagingStore::new(Arc::new(open(&dir, "site-a").await));

    assert!(staging.save("stagehand:pending-metadata", &fields()).await);
    assert!(staging.save("stagehand:draft:1", &fields()).await);
    assert!(staging.save("other:thing", &fields()).await);

    staging.clear(ClearTarget::Prefix("stagehand:".to_string())).await;
    assert_eq!(staging.keys().await, vec!["other:thing".to_string()]);
}

//! Persistent staging store
//!
//! Carries small JSON payloads across a page reload or redirect, for example
//! metadata entered on an upload form before the host has assigned the new
//! track its identifier.
//!
//! # Record format
//!
//! Each key holds `{"payload": <json>, "timestamp": <unix millis>}`. Readers
//! tolerate missing, malformed or mistyped records: any of those is treated as
//! absent and the key is removed.
//!
//! # Failure policy
//!
//! Storage and serialization failures are logged and swallowed. Callers get a
//! `bool`/`Option` and never an error, so a full or corrupt store can only cost
//! the user a staged form, never break the page.

mod memory;
#[cfg(feature = "sqlx")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlx")]
pub use sqlite::SqliteStore;

use crate::time::{Clock, SystemClock};
use crate::Result;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key under which deferred custom-field submissions are staged
pub const PENDING_METADATA_KEY: &str = "stagehand:pending-metadata";

/// Default maximum age of a staged record (30 minutes)
pub const DEFAULT_STAGING_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Origin-scoped string key-value storage
///
/// Object-safe so the staging store can hold any backend behind an `Arc`.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;
    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>>;
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
    fn keys<'a>(&'a self) -> BoxFuture<'a, Result<Vec<String>>>;
}

/// Persisted envelope around a staged payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedRecord<T> {
    pub payload: T,
    /// Unix timestamp in milliseconds when the record was saved
    pub timestamp: i64,
}

/// What `clear` removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearTarget {
    /// Exactly one key
    Key(String),
    /// Every key starting with the prefix
    Prefix(String),
}

/// JSON staging layer over a key-value backend
#[derive(Clone)]
pub struct StagingStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl StagingStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// In-memory staging store (tests, replays)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Save `payload` under `key`, overwriting any previous record
    ///
    /// Returns false if the payload could not be serialized or stored.
    pub async fn save<T: Serialize>(&self, key: &str, payload: &T) -> bool {
        let record = StagedRecord {
            payload,
            timestamp: self.clock.now().timestamp_millis(),
        };

        let encoded = match serde_json::to_string(&record) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key, error = %e, "Staging save skipped: payload not serializable");
                return false;
            }
        };

        match self.store.set(key, encoded).await {
            Ok(()) => {
                debug!(key, "Staged record saved");
                true
            }
            Err(e) => {
                warn!(key, error = %e, "Staging save failed");
                false
            }
        }
    }

    /// Load the payload under `key` if it is present, well-formed and no
    /// older than `max_age`
    ///
    /// Anything else removes the key and returns `None`, so repeated loads of
    /// an expired record keep returning `None`.
    pub async fn load<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Staging read failed");
                return None;
            }
        };

        let record: StagedRecord<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key, error = %e, "Discarding malformed staged record");
                self.remove_quietly(key).await;
                return None;
            }
        };

        let age_ms = self.clock.now().timestamp_millis() - record.timestamp;
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        if age_ms > max_age_ms {
            debug!(key, age_ms, max_age_ms, "Discarding expired staged record");
            self.remove_quietly(key).await;
            return None;
        }

        match serde_json::from_value(record.payload) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(key, error = %e, "Discarding staged record with unexpected shape");
                self.remove_quietly(key).await;
                None
            }
        }
    }

    /// Remove one key or every key with a prefix
    pub async fn clear(&self, target: ClearTarget) {
        match target {
            ClearTarget::Key(key) => self.remove_quietly(&key).await,
            ClearTarget::Prefix(prefix) => {
                let keys = match self.store.keys().await {
                    Ok(keys) => keys,
                    Err(e) => {
                        warn!(prefix = %prefix, error = %e, "Staging key listing failed");
                        return;
                    }
                };
                for key in keys.iter().filter(|k| k.starts_with(&prefix)) {
                    self.remove_quietly(key).await;
                }
            }
        }
    }

    /// Keys currently present in the backend (unfiltered by age)
    pub async fn keys(&self) -> Vec<String> {
        match self.store.keys().await {
            Ok(mut keys) => {
                keys.sort();
                keys
            }
            Err(e) => {
                warn!(error = %e, "Staging key listing failed");
                Vec::new()
            }
        }
    }

    async fn remove_quietly(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            warn!(key, error = %e, "Staging remove failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn store_with_clock() -> (StagingStore, Arc<MemoryStore>, ManualClock) {
        let backend = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 0).unwrap());
        let staging = StagingStore::with_clock(backend.clone(), Arc::new(clock.clone()));
        (staging, backend, clock)
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let (staging, _, _) = store_with_clock();
        let payload = json!({
            "key": "F#",
            "scale": "minor",
            "tempo": 142,
            "producers": ["metro", "wheezy"],
        });

        assert!(staging.save("form", &payload).await);
        let loaded: Option<serde_json::Value> = staging.load("form", Duration::from_secs(60)).await;
        assert_eq!(loaded, Some(payload));
    }

    #[tokio::test]
    async fn test_expired_record_is_removed_and_stays_absent() {
        let (staging, backend, clock) = store_with_clock();
        staging.save("form", &json!({"tempo": 90})).await;

        clock.advance_ms(60_001);
        let first: Option<serde_json::Value> = staging.load("form", Duration::from_secs(60)).await;
        assert_eq!(first, None);
        assert!(backend.snapshot().is_empty());

        let second: Option<serde_json::Value> = staging.load("form", Duration::from_secs(60)).await;
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn test_record_at_exact_max_age_is_still_valid() {
        let (staging, _, clock) = store_with_clock();
        staging.save("form", &json!({"tempo": 90})).await;
        clock.advance_ms(60_000);
        let loaded: Option<serde_json::Value> = staging.load("form", Duration::from_secs(60)).await;
        assert!(loaded.is_some());
    }

    #[tokio::test]
    async fn test_malformed_record_is_removed() {
        let (staging, backend, _) = store_with_clock();
        backend.set("form", "{not json".to_string()).await.unwrap();

        let loaded: Option<serde_json::Value> = staging.load("form", Duration::from_secs(60)).await;
        assert_eq!(loaded, None);
        assert!(backend.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_shape_is_removed() {
        #[derive(Debug, Deserialize)]
        struct Form {
            #[allow(dead_code)]
            tempo: u32,
        }

        let (staging, backend, _) = store_with_clock();
        staging.save("form", &json!({"tempo": "fast"})).await;

        let loaded: Option<Form> = staging.load("form", Duration::from_secs(60)).await;
        assert!(loaded.is_none());
        assert!(backend.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (staging, _, _) = store_with_clock();
        staging.save("form", &json!({"tempo": 90})).await;
        staging.save("form", &json!({"tempo": 120})).await;
        let loaded: Option<serde_json::Value> = staging.load("form", Duration::from_secs(60)).await;
        assert_eq!(loaded, Some(json!({"tempo": 120})));
    }

    #[tokio::test]
    async fn test_quota_failure_is_swallowed() {
        let backend = Arc::new(MemoryStore::with_quota(16));
        let staging = StagingStore::new(backend.clone());

        assert!(!staging.save("form", &json!({"notes": "a long description that will not fit"})).await);
        let loaded: Option<serde_json::Value> = staging.load("form", Duration::from_secs(60)).await;
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn test_clear_key_and_prefix() {
        let (staging, backend, _) = store_with_clock();
        staging.save("stagehand:pending-metadata", &json!({})).await;
        staging.save("stagehand:draft:1", &json!({})).await;
        staging.save("stagehand:draft:2", &json!({})).await;
        staging.save("host:session", &json!({})).await;

        staging
            .clear(ClearTarget::Key("stagehand:pending-metadata".to_string()))
            .await;
        staging
            .clear(ClearTarget::Prefix("stagehand:draft:".to_string()))
            .await;

        assert_eq!(backend.snapshot().keys().cloned().collect::<Vec<_>>(), vec!["host:session".to_string()]);
        assert_eq!(staging.keys().await, vec!["host:session".to_string()]);
    }
}

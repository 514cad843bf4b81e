//! In-memory key-value backend

use super::KeyValueStore;
use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Process-local store with an optional byte quota
///
/// The quota counts key and value bytes, which is enough to exercise the
/// quota-exceeded path the staging layer has to tolerate.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Sorted copy of the current contents
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_sync(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.lock();

        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(Error::Internal(format!(
                    "storage quota exceeded ({} bytes)",
                    quota
                )));
            }
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        let value = self.lock().get(key).cloned();
        futures::future::ready(Ok(value)).boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        futures::future::ready(self.set_sync(key, value)).boxed()
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        self.lock().remove(key);
        futures::future::ready(Ok(())).boxed()
    }

    fn keys<'a>(&'a self) -> BoxFuture<'a, Result<Vec<String>>> {
        let keys = self.lock().keys().cloned().collect();
        futures::future::ready(Ok(keys)).boxed()
    }
}

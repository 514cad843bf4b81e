//! TTL cache with in-flight request deduplication
//!
//! Results of idempotent asynchronous requests are cached for a fixed window
//! and concurrent requests for the same key share one underlying computation.
//!
//! # Invariants
//!
//! - An entry older than the cache duration is treated as absent and evicted
//!   lazily when read; nothing sweeps the cache in the background.
//! - At most one pending computation exists per key. It is removed when it
//!   settles (success or failure) or when every waiter has dropped it.
//! - A failed computation is delivered to every waiter and never cached.
//!
//! Every read-check-then-write sequence runs inside one short critical section
//! that never spans an await point.

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Default freshness window for cached responses (5 minutes)
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(300);

/// Handle to a possibly shared, possibly already-resolved request
pub type PendingRequest<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

/// Build a cache key from method, URL and request body
///
/// The body is hashed so keys stay short for large payloads.
pub fn request_key(method: &str, url: &str, body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{} {} {}", method.to_ascii_uppercase(), url, hex)
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

struct CacheInner<V, E> {
    entries: HashMap<String, CacheEntry<V>>,
    pending: HashMap<String, (u64, WeakShared<BoxFuture<'static, Result<V, E>>>)>,
    next_ticket: u64,
}

/// Keyed TTL cache that collapses concurrent identical requests
///
/// Cloning yields another handle to the same cache.
pub struct RequestCache<V, E> {
    inner: Arc<Mutex<CacheInner<V, E>>>,
    duration: Duration,
}

impl<V, E> Clone for RequestCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            duration: self.duration,
        }
    }
}

/// Removes the pending handle for a key when the shared computation finishes
/// or is dropped unfinished
struct PendingGuard<V, E> {
    inner: Arc<Mutex<CacheInner<V, E>>>,
    key: String,
    ticket: u64,
}

impl<V, E> Drop for PendingGuard<V, E> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner
            .pending
            .get(&self.key)
            .is_some_and(|(ticket, _)| *ticket == self.ticket)
        {
            inner.pending.remove(&self.key);
        }
    }
}

impl<V, E> RequestCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(duration: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                pending: HashMap::new(),
                next_ticket: 0,
            })),
            duration,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<V, E>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fresh_value(inner: &mut CacheInner<V, E>, key: &str, duration: Duration) -> Option<V> {
        let now = Instant::now();
        match inner.entries.get(key) {
            Some(entry) if now.duration_since(entry.stored_at) < duration => {
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Return the cached value if it is still fresh
    ///
    /// A stale entry is evicted by this call.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        Self::fresh_value(&mut inner, key, self.duration)
    }

    /// Store a value directly, replacing any previous entry
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.lock().entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Request a value, sharing any in-flight computation for the same key
    ///
    /// Resolution order: pending computation, fresh cache entry (returned as
    /// an already-resolved handle), otherwise a new computation is registered
    /// as pending before this call returns. `factory` runs exactly once, when
    /// that computation is first polled, outside the cache lock, so it may
    /// read the cache itself.
    pub fn request<F, Fut>(&self, key: &str, factory: F) -> PendingRequest<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut inner = self.lock();

        if let Some(pending) = inner.pending.get(key).and_then(|(_, weak)| weak.upgrade()) {
            tracing::trace!(key, "Joining in-flight request");
            return pending;
        }

        if let Some(value) = Self::fresh_value(&mut inner, key, self.duration) {
            tracing::trace!(key, "Serving request from cache");
            return futures::future::ready(Ok(value)).boxed().shared();
        }

        let ticket = inner.next_ticket;
        inner.next_ticket += 1;

        let guard = PendingGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            ticket,
        };
        let owner = Arc::clone(&self.inner);
        let owned_key = key.to_string();

        let shared = async move {
            let guard = guard;
            let result = factory().await;
            if let Ok(value) = &result {
                let mut inner = owner.lock().unwrap_or_else(|e| e.into_inner());
                inner.entries.insert(
                    owned_key,
                    CacheEntry {
                        value: value.clone(),
                        stored_at: Instant::now(),
                    },
                );
            }
            drop(guard);
            result
        }
        .boxed()
        .shared();

        // The map holds only a weak handle: once every caller drops its handle
        // the computation is dropped and the guard clears the slot.
        if let Some(weak) = shared.downgrade() {
            inner.pending.insert(key.to_string(), (ticket, weak));
        }
        shared
    }

    /// Remove one cached entry (pending computations are left alone)
    pub fn clear(&self, key: &str) {
        self.lock().entries.remove(key);
    }

    /// Remove every cached entry whose key starts with `prefix`
    pub fn clear_prefix(&self, prefix: &str) {
        self.lock().entries.retain(|key, _| !key.starts_with(prefix));
    }

    /// Remove all cached entries
    pub fn clear_all(&self) {
        self.lock().entries.clear();
    }

    /// True if a computation for `key` is currently in flight
    pub fn is_pending(&self, key: &str) -> bool {
        // The upgraded handle must outlive the lock: if it turns out to be the
        // last strong handle, dropping it runs the guard, which locks again.
        let handle = {
            let inner = self.lock();
            inner.pending.get(key).and_then(|(_, weak)| weak.upgrade())
        };
        handle.is_some()
    }

    /// Number of stored entries, fresh or not
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

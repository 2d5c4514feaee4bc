//! Typed, TTL-evicting cache of loaded models.
//!
//! One instance per key; concurrent first-use for the same key triggers
//! exactly one load.  The entry map and the load-lock map are guarded by
//! short-held locks; only the per-key load lock is held across the (slow)
//! loader call, so cold starts of unrelated models never serialise.
//!
//! Loaders must not re-enter [`ModelCache::get_or_load`] for the key being
//! loaded — the per-key lock is held across the call and re-entry deadlocks.
//! Routers that expose load endpoints delegate to the loader; they never
//! take the lock a second time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::adapter::ModelHandle;
use lf_domain::Result;

struct CacheEntry {
    handle: Arc<ModelHandle>,
    last_access: Instant,
}

/// Cache of loaded models keyed by the identity tuple's cache key.
pub struct ModelCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Per-key load locks.  Entries are created under this map's lock and
    /// the inner mutex is held across the slow load.
    load_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    unload_timeout: Duration,
}

impl ModelCache {
    pub fn new(unload_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
            unload_timeout,
        }
    }

    pub fn unload_timeout(&self) -> Duration {
        self.unload_timeout
    }

    /// Return the cached model for `key`, loading it via `loader` on a miss.
    ///
    /// On a hit the access timestamp is refreshed.  On a miss the per-key
    /// lock is taken, the cache is re-checked (another caller may have
    /// finished the load while we waited), and only then is `loader` run.
    pub async fn get_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<Arc<ModelHandle>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ModelHandle>>,
    {
        if let Some(handle) = self.get(key) {
            return Ok(handle);
        }

        let key_lock = self.load_lock(key);
        let _guard = key_lock.lock().await;

        // Double-check: the previous holder may have loaded it.
        if let Some(handle) = self.get(key) {
            return Ok(handle);
        }

        tracing::info!(key, "loading model");
        let handle = Arc::new(loader().await?);
        self.entries.lock().insert(
            key.to_owned(),
            CacheEntry {
                handle: handle.clone(),
                last_access: Instant::now(),
            },
        );
        tracing::info!(key, "model loaded and cached");
        Ok(handle)
    }

    /// Look up without loading; refreshes the access timestamp on a hit.
    pub fn get(&self, key: &str) -> Option<Arc<ModelHandle>> {
        let mut entries = self.entries.lock();
        entries.get_mut(key).map(|entry| {
            entry.last_access = Instant::now();
            entry.handle.clone()
        })
    }

    /// Refresh the access timestamp for a key consumed through a fast path
    /// that bypassed [`get_or_load`].
    pub fn touch(&self, key: &str) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.last_access = Instant::now();
        }
    }

    /// Remove an entry and unload its model.  Returns true if the key was
    /// present.  Unload failures are logged and swallowed — the cache is not
    /// the source of truth for durable state, and a failed unload must not
    /// keep a dead entry alive.
    pub async fn drop_entry(&self, key: &str) -> bool {
        let entry = self.entries.lock().remove(key);
        let Some(entry) = entry else {
            return false;
        };
        if let Err(e) = entry.handle.unload().await {
            tracing::warn!(key, error = %e, "model unload failed; entry evicted anyway");
        } else {
            tracing::info!(key, "model unloaded");
        }
        // Drop the load lock too so the map does not grow unbounded.
        self.load_locks.lock().remove(key);
        true
    }

    /// Evict every entry idle longer than the unload timeout.  Keys are
    /// collected under the map lock; unloads run outside it.  One failing
    /// eviction never prevents the others.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(_, e)| now.duration_since(e.last_access) > self.unload_timeout)
                .map(|(k, _)| k.clone())
                .collect()
        };

        let mut evicted = 0;
        for key in expired {
            if self.drop_entry(&key).await {
                evicted += 1;
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn load_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.load_locks.lock();
        locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Spawn the background reaper: every `interval` it evicts entries idle
/// longer than the cache's unload timeout.
pub fn spawn_reaper(
    cache: Arc<ModelCache>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh cache is not
        // swept before anything can be loaded.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = cache.evict_idle().await;
            if evicted > 0 {
                tracing::debug!(evicted, "model cache sweep");
            }
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

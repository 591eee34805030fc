//! In-memory TTL cache with an optional disk tier

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::{CacheKey, CacheManager, CachedData, Clock, SystemClock};

/// One stored payload; replaced wholesale on refresh, never edited
#[derive(Debug, Clone)]
struct Entry {
    payload: Value,
    stored_at: DateTime<Utc>,
}

/// Response cache keyed by [`CacheKey`]
///
/// `get` only ever returns entries younger than the TTL. Expired entries are
/// left in place so [`TtlCache::lookup`] can still offer them as stale data
/// when the upstream fails; [`TtlCache::purge_older_than`] removes them once
/// they are too old to be useful even for that.
#[derive(Debug)]
pub struct TtlCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<CacheKey, Entry>>,
    persistence: Option<CacheManager>,
}

impl TtlCache {
    /// Creates a cache on the wall clock
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Creates a cache reading time from `clock`
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
            persistence: None,
        }
    }

    /// Writes every `put` through to `manager` and reads it back on a memory miss
    pub fn with_persistence(mut self, manager: CacheManager) -> Self {
        self.persistence = Some(manager);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - stored_at < self.ttl
    }

    /// Returns the payload for `key` if it is still within the TTL
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        match self.lookup(key) {
            Some(cached) if !cached.is_expired => {
                debug!(key = %key, "cache hit");
                Some(cached.data)
            }
            Some(_) => {
                debug!(key = %key, "cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Returns the entry for `key` whatever its age, flagged if expired
    ///
    /// Memory is consulted first; the disk tier is only read when memory has
    /// nothing, and a disk hit is copied into memory.
    pub fn lookup(&self, key: &CacheKey) -> Option<CachedData<Value>> {
        let now = self.clock.now();

        if let Some(entry) = self.entries().get(key).cloned() {
            return Some(CachedData {
                is_expired: !self.is_fresh(entry.stored_at, now),
                data: entry.payload,
                cached_at: entry.stored_at,
            });
        }

        let manager = self.persistence.as_ref()?;
        let on_disk: CachedData<Value> = manager.read(key, now)?;
        debug!(key = %key, expired = on_disk.is_expired, "loaded entry from disk");

        // The disk entry's own expiry was written with whatever TTL was in
        // force then; judge it against this cache's TTL instead.
        let cached = CachedData {
            is_expired: !self.is_fresh(on_disk.cached_at, now),
            ..on_disk
        };

        self.entries().entry(key.clone()).or_insert_with(|| Entry {
            payload: cached.data.clone(),
            stored_at: cached.cached_at,
        });

        Some(cached)
    }

    /// Stores `payload` under `key`, replacing any earlier entry
    pub fn put(&self, key: CacheKey, payload: Value) {
        let stored_at = self.clock.now();

        if let Some(ref manager) = self.persistence {
            if let Err(e) = manager.write(&key, &payload, stored_at, self.ttl) {
                warn!(key = %key, error = %e, "failed to persist cache entry");
            }
        }

        debug!(key = %key, "cached payload");
        self.entries().insert(key, Entry { payload, stored_at });
    }

    /// Drops entries older than `ttl + retention` from memory and disk
    ///
    /// Returns how many in-memory entries were removed.
    pub fn purge_older_than(&self, retention: Duration) -> usize {
        let now = self.clock.now();
        let Some(cutoff) = self.ttl.checked_add(&retention) else {
            return 0;
        };

        let removed: Vec<CacheKey> = {
            let mut entries = self.entries();
            let stale: Vec<CacheKey> = entries
                .iter()
                .filter(|(_, e)| now - e.stored_at >= cutoff)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &stale {
                entries.remove(key);
            }
            stale
        };

        if let Some(ref manager) = self.persistence {
            for key in &removed {
                if let Err(e) = manager.remove(key) {
                    warn!(key = %key, error = %e, "failed to remove cache file");
                }
            }
        }

        if !removed.is_empty() {
            debug!(count = removed.len(), "purged expired cache entries");
        }
        removed.len()
    }

    /// Number of entries held in memory, fresh or not
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

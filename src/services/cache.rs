//! In-memory TTL cache and advisory job lock.
//!
//! The cache serves two purposes: low-latency reads of scan results and
//! diffs, and a set-if-absent primitive the periodic jobs use as a
//! single-instance execution lock. The lock is process-local only; it
//! stops re-entrant runs of the same job inside one process, nothing more.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One cached value with its absolute expiry.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Hit/miss counters for the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Shared in-memory key/value store with per-entry expiry.
#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<Mutex<CacheInner>>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value with a TTL in whole minutes.
    ///
    /// A TTL of zero minutes means the entry is already expired when
    /// written; it will never be returned. This is intentional and
    /// distinct from "no expiry", which the store does not offer.
    pub fn set(&self, key: &str, value: Value, ttl_minutes: u64) {
        let expires_at = Instant::now() + Duration::from_secs(ttl_minutes * 60);
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.insert(
            key.to_string(),
            CacheEntry { value, expires_at },
        );
    }

    /// Fetch a live value. Expired entries are reaped on the way out and
    /// count as misses.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a value only when no live entry exists for the key.
    ///
    /// Returns true when the value was stored. An expired entry under the
    /// key does not block the write.
    pub fn set_if_absent(&self, key: &str, value: Value, ttl_minutes: u64) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        if let Some(entry) = inner.entries.get(key) {
            if !entry.is_expired(now) {
                return false;
            }
        }

        let expires_at = now + Duration::from_secs(ttl_minutes * 60);
        inner.entries.insert(
            key.to_string(),
            CacheEntry { value, expires_at },
        );
        true
    }

    /// Remove an entry. Returns true when something was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.remove(key).is_some()
    }

    /// Drop all expired entries. Returns how many were reaped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        before - inner.entries.len()
    }

    /// Current hit/miss counters and live entry count.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
        }
    }

    /// Acquire the advisory lock for a periodic job.
    ///
    /// Returns None when the job already holds the lock (another run is in
    /// flight in this process). The lock key is removed when the returned
    /// guard drops; the TTL bounds the damage of a leaked guard.
    pub fn acquire_lock(&self, key: &str, ttl_minutes: u64) -> Option<JobLock> {
        if self.set_if_absent(key, Value::Bool(true), ttl_minutes) {
            Some(JobLock {
                store: self.clone(),
                key: key.to_string(),
            })
        } else {
            None
        }
    }
}

/// RAII guard for the cache-based job lock.
pub struct JobLock {
    store: CacheStore,
    key: String,
}

impl Drop for JobLock {
    fn drop(&mut self) {
        self.store.remove(&self.key);
    }
}

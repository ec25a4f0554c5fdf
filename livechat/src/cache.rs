//! In-memory TTL cache for lookups that are expensive in quota.
//!
//! Entries expire lazily: an expired entry is removed the next time it is
//! read, or by an explicit [`Cache::cleanup`]. When the cache is full, expired
//! entries are purged first and then the entry closest to expiry is evicted.

use crate::config::CacheConfig;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Counts returned by [`Cache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
}

#[derive(Debug)]
pub struct Cache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    default_ttl: Duration,
    capacity: usize,
}

impl<V: Clone> Default for Cache<V> {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl<V: Clone> Cache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl: config.default_ttl,
            capacity: config.capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live value for `key`, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| !entry.is_expired(now));
            if entries.len() >= self.capacity {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = soonest {
                    tracing::trace!(key = %victim, "cache full, evicting entry");
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Removes `key`, returning whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Purges expired entries and returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.lock();
        let expired = entries.values().filter(|e| e.is_expired(now)).count();
        CacheStats {
            total: entries.len(),
            active: entries.len() - expired,
            expired,
        }
    }

    /// Returns the cached value for `key`, or computes and caches it.
    ///
    /// The lock is not held while `compute` runs, so two concurrent misses
    /// for the same key may both compute; the later result wins. Errors are
    /// returned as-is and nothing is cached.
    pub async fn get_or_set<F, Fut, E>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        // another caller may have filled the entry since the first look
        {
            let entries = self.lock();
            if let Some(entry) = entries.get(key)
                && !entry.is_expired(Instant::now())
            {
                return Ok(entry.value.clone());
            }
        }

        let value = compute().await?;
        self.set(key, value.clone());
        Ok(value)
    }
}

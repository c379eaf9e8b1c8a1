//! In-process cache backend.
//!
//! A [`DashMap`] keyed by the full cache key. Expiry is lazy: entries are
//! checked against the clock on access and replaced or dropped when stale.
//! `add` takes the shard lock through the entry API, which gives it a single
//! winner under concurrency.

use crate::backend::CacheBackend;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use atrium_core::{SharedClock, SystemClock};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    /// Unix milliseconds after which the value is gone.
    expires_at: Option<i64>,
}

impl StoredValue {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at.map_or(true, |at| now_ms < at)
    }
}

/// Hit/miss counters for the in-memory backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Memcached-flavoured in-memory backend.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: DashMap<String, StoredValue>,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    /// Backend whose expiry follows the given clock.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn expiry(&self, ttl_secs: Option<u32>) -> Option<i64> {
        ttl_secs.map(|secs| self.clock.now_millis().saturating_add(i64::from(secs) * 1000))
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = self.clock.now_millis();
        let found = self
            .entries
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.value.clone());

        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.entries.remove_if(key, |_, stored| !stored.is_live(now));
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<u32>) -> CacheResult<()> {
        let stored = StoredValue {
            value: value.to_vec(),
            expires_at: self.expiry(ttl_secs),
        };
        self.entries.insert(key.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, stored)| stored.is_live(now)))
    }

    async fn increment(&self, key: &str, delta: u64) -> CacheResult<Option<u64>> {
        let now = self.clock.now_millis();
        match self.entries.entry(key.to_string()) {
            Entry::Vacant(_) => Ok(None),
            Entry::Occupied(occupied) if !occupied.get().is_live(now) => {
                occupied.remove();
                Ok(None)
            }
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get_mut();
                let current = std::str::from_utf8(&stored.value)
                    .ok()
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .ok_or_else(|| {
                        CacheError::Backend(format!("value at {key} is not a decimal counter"))
                    })?;
                let next = current.wrapping_add(delta);
                stored.value = next.to_string().into_bytes();
                Ok(Some(next))
            }
        }
    }

    async fn add(&self, key: &str, value: &[u8], ttl_secs: u32) -> CacheResult<()> {
        let now = self.clock.now_millis();
        let stored = StoredValue {
            value: value.to_vec(),
            expires_at: self.expiry(Some(ttl_secs)),
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) if occupied.get().is_live(now) => Err(CacheError::NotStored),
            Entry::Occupied(mut occupied) => {
                occupied.insert(stored);
                Ok(())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(stored);
                Ok(())
            }
        }
    }

    async fn flush_all(&self) -> CacheResult<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::ManualClock;
    use std::time::Duration;

    fn backend() -> (MemoryBackend, ManualClock) {
        let clock = ManualClock::at_millis(1_700_000_000_000);
        (MemoryBackend::with_clock(clock.shared()), clock)
    }

    #[tokio::test]
    async fn test_set_get_expires_with_clock() {
        let (cache, clock) = backend();
        cache.set("k", b"v", Some(2)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_set_without_ttl_never_expires() {
        let (cache, clock) = backend();
        cache.set("k", b"v", None).await.unwrap();
        clock.advance(Duration::from_secs(86_400 * 365));
        assert!(cache.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_add_rejects_live_key_and_replaces_expired() {
        let (cache, clock) = backend();
        cache.add("k", b"first", 1).await.unwrap();
        assert_eq!(cache.add("k", b"second", 1).await, Err(CacheError::NotStored));

        clock.advance(Duration::from_millis(1_001));
        cache.add("k", b"third", 1).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"third".to_vec()));
    }

    #[tokio::test]
    async fn test_increment_reports_miss_then_counts() {
        let (cache, _clock) = backend();
        assert_eq!(cache.increment("n", 5).await.unwrap(), None);

        cache.set("n", b"5", Some(60)).await.unwrap();
        assert_eq!(cache.increment("n", 5).await.unwrap(), Some(10));
        assert_eq!(cache.get("n").await.unwrap(), Some(b"10".to_vec()));
    }

    #[tokio::test]
    async fn test_increment_keeps_expiry() {
        let (cache, clock) = backend();
        cache.set("n", b"1", Some(10)).await.unwrap();
        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.increment("n", 1).await.unwrap(), Some(2));
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.increment("n", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_non_numeric_is_backend_error() {
        let (cache, _clock) = backend();
        cache.set("n", b"abc", None).await.unwrap();
        assert!(matches!(cache.increment("n", 1).await, Err(CacheError::Backend(_))));
    }

    #[tokio::test]
    async fn test_delete_and_flush() {
        let (cache, _clock) = backend();
        cache.set("a", b"1", None).await.unwrap();
        cache.set("b", b"2", None).await.unwrap();

        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());

        cache.flush_all().await.unwrap();
        assert_eq!(cache.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stats_count_hits_and_misses() {
        let (cache, _clock) = backend();
        cache.set("a", b"1", None).await.unwrap();
        cache.get("a").await.unwrap();
        cache.get("missing").await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}

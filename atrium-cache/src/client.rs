//! Cache client.
//!
//! Validates and namespaces keys, normalizes TTLs to whole seconds, and adds
//! JSON helpers on top of a [`CacheBackend`].

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::memory::MemoryBackend;
use crate::redis_backend::RedisBackend;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Longest key accepted, prefix included.
pub const MAX_KEY_LEN: usize = 250;

/// Convert a TTL to whole seconds: rounded up, at least 1, saturating.
///
/// A zero or sub-second TTL still expires; it never turns into "no expiry".
pub fn ttl_seconds(ttl: Duration) -> u32 {
    let mut secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs = secs.saturating_add(1);
    }
    u32::try_from(secs.max(1)).unwrap_or(u32::MAX)
}

/// Serialize a value to JSON bytes.
pub fn marshal<T: Serialize + ?Sized>(value: &T) -> CacheResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserialize JSON bytes.
pub fn unmarshal<T: DeserializeOwned>(bytes: &[u8]) -> CacheResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Cloneable handle to a cache backend.
#[derive(Debug, Clone)]
pub struct CacheClient {
    backend: Arc<dyn CacheBackend>,
    prefix: Arc<str>,
}

impl CacheClient {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            prefix: Arc::from(""),
        }
    }

    /// Namespace every key with `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Arc::from(prefix.into());
        self
    }

    /// Client backed by a fresh in-process store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Build a client from configuration.
    ///
    /// Returns `Ok(None)` when no URL is configured.
    pub async fn connect(config: &CacheConfig) -> CacheResult<Option<Self>> {
        let Some(url) = config.url.as_deref() else {
            tracing::warn!("No cache URL configured; cache-backed coordination will degrade");
            return Ok(None);
        };

        let backend: Arc<dyn CacheBackend> = if config.is_memory() {
            tracing::info!("Using in-process cache backend");
            Arc::new(MemoryBackend::new())
        } else {
            Arc::new(RedisBackend::connect(url).await?)
        };

        Ok(Some(Self::new(backend).with_prefix(config.key_prefix.clone())))
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    fn key(&self, key: &str) -> CacheResult<String> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey("key is empty".to_string()));
        }
        if let Some(c) = key.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(CacheError::InvalidKey(format!(
                "key {key:?} contains forbidden character {c:?}"
            )));
        }
        let full = format!("{}{}", self.prefix, key);
        if full.len() > MAX_KEY_LEN {
            return Err(CacheError::InvalidKey(format!(
                "key is {} bytes, max {MAX_KEY_LEN}",
                full.len()
            )));
        }
        Ok(full)
    }

    // ========================================================================
    // RAW BYTES
    // ========================================================================

    pub async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.backend.get(&self.key(key)?).await
    }

    /// Store without expiry.
    pub async fn set(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        self.backend.set(&self.key(key)?, value, None).await
    }

    pub async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.backend
            .set(&self.key(key)?, value, Some(ttl_seconds(ttl)))
            .await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.backend.delete(&self.key(key)?).await
    }

    /// Add `delta` to a counter and return the new value.
    ///
    /// A missing counter is seeded to `delta` with a plain set. Two callers
    /// racing on first use may both seed, so the first increments can be
    /// lost; use [`add`](Self::add) where a single winner matters.
    pub async fn increment(&self, key: &str, delta: u64) -> CacheResult<u64> {
        let full = self.key(key)?;
        if let Some(next) = self.backend.increment(&full, delta).await? {
            return Ok(next);
        }
        self.backend
            .set(&full, delta.to_string().as_bytes(), None)
            .await?;
        Ok(delta)
    }

    /// Store only if absent. Fails with [`CacheError::NotStored`] otherwise.
    pub async fn add(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.backend
            .add(&self.key(key)?, value, ttl_seconds(ttl))
            .await
    }

    pub async fn flush_all(&self) -> CacheResult<()> {
        self.backend.flush_all().await
    }

    // ========================================================================
    // JSON
    // ========================================================================

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(unmarshal(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json_with_ttl<T: Serialize + ?Sized + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let bytes = marshal(value)?;
        self.set_with_ttl(key, &bytes, ttl).await
    }

    pub async fn add_json<T: Serialize + ?Sized + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let bytes = marshal(value)?;
        self.add(key, &bytes, ttl).await
    }
}

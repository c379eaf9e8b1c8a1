//! Cache backend trait.
//!
//! The seam between [`CacheClient`](crate::CacheClient) and a concrete
//! key/value store. Semantics follow memcached: `add` is create-if-absent,
//! `increment` reports a miss instead of creating the key, and TTLs are whole
//! seconds.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::fmt;

/// Pluggable key/value cache backend.
///
/// Implementations must be safe to share across tasks. Keys arrive already
/// validated and prefixed by the client.
#[async_trait]
pub trait CacheBackend: Send + Sync + fmt::Debug {
    /// Fetch a value. `None` on miss or expiry.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a value unconditionally. `None` TTL means no expiry.
    async fn set(&self, key: &str, value: &[u8], ttl_secs: Option<u32>) -> CacheResult<()>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Add `delta` to a numeric value, returning the new value.
    ///
    /// Returns `Ok(None)` when the key does not exist. Backends that create
    /// on miss never return `None`.
    async fn increment(&self, key: &str, delta: u64) -> CacheResult<Option<u64>>;

    /// Store a value only if the key is absent.
    ///
    /// Fails with [`CacheError::NotStored`](crate::CacheError::NotStored)
    /// when a live value already exists. Exactly one of any number of
    /// concurrent callers for the same key succeeds.
    async fn add(&self, key: &str, value: &[u8], ttl_secs: u32) -> CacheResult<()>;

    /// Drop every key.
    async fn flush_all(&self) -> CacheResult<()>;
}

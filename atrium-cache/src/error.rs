//! Cache error types.

use thiserror::Error;

/// Errors returned by cache backends and the cache client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// `add` found an existing live key. Control flow, not a failure.
    #[error("key already exists")]
    NotStored,

    /// The cache could not be reached (connection refused, dropped, timed out).
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// The cache answered with an error.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A value could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serialization(String),

    /// The key is empty, too long, or contains whitespace/control characters.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),
}

impl CacheError {
    /// Whether this is the `add` sentinel for an existing key.
    pub fn is_not_stored(&self) -> bool {
        matches!(self, CacheError::NotStored)
    }

    /// Whether the cache itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            tracing::debug!(error = %e, "Redis connection failure");
            CacheError::Unavailable(e.to_string())
        } else {
            CacheError::Backend(e.to_string())
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_stored_predicate() {
        assert!(CacheError::NotStored.is_not_stored());
        assert!(!CacheError::Backend("x".into()).is_not_stored());
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let err = serde_json::from_slice::<u32>(b"not json").unwrap_err();
        assert!(matches!(CacheError::from(err), CacheError::Serialization(_)));
    }

    #[test]
    fn test_redis_io_error_is_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = CacheError::from(redis::RedisError::from(io));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_redis_response_error_is_backend() {
        let err = redis::RedisError::from((redis::ErrorKind::ResponseError, "WRONGTYPE"));
        assert!(matches!(CacheError::from(err), CacheError::Backend(_)));
    }
}

//! Cache configuration.

use crate::policy::FailMode;
use atrium_core::{env_parse, env_string};

/// Where the cache lives and how coordination degrades without it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheConfig {
    /// `redis://...` for Redis, `memory://` for the in-process backend.
    /// `None` means no cache is configured.
    pub url: Option<String>,

    /// Prepended to every key, e.g. `"myapp:"`.
    pub key_prefix: String,

    /// Decision Throttle and Cooldown fall back to when the cache is
    /// missing or failing.
    pub fail_mode: FailMode,
}

impl CacheConfig {
    /// Load from environment variables.
    ///
    /// - `ATRIUM_CACHE_URL`: backend URL (unset = no cache)
    /// - `ATRIUM_CACHE_KEY_PREFIX`: key namespace (default: empty)
    /// - `ATRIUM_COORDINATION_FAIL_MODE`: `open` or `closed` (default: open)
    pub fn from_env() -> Self {
        Self {
            url: env_string("ATRIUM_CACHE_URL"),
            key_prefix: env_string("ATRIUM_CACHE_KEY_PREFIX").unwrap_or_default(),
            fail_mode: env_parse("ATRIUM_COORDINATION_FAIL_MODE", FailMode::Open),
        }
    }

    /// Config for the in-process backend.
    pub fn memory() -> Self {
        Self {
            url: Some("memory://".to_string()),
            ..Self::default()
        }
    }

    /// Whether the URL selects the in-process backend.
    pub fn is_memory(&self) -> bool {
        self.url.as_deref().is_some_and(|u| u.starts_with("memory://"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_url_and_fails_open() {
        let config = CacheConfig::default();
        assert!(config.url.is_none());
        assert_eq!(config.fail_mode, FailMode::Open);
        assert!(!config.is_memory());
    }

    #[test]
    fn test_memory_config() {
        assert!(CacheConfig::memory().is_memory());
    }
}

//! Windowed rate limiting over the cache.
//!
//! State per key is a small JSON document `{count, last}` stored with a TTL
//! equal to the window. The window therefore restarts when the entry
//! expires, not on a fixed boundary. Read-modify-write is not atomic: under
//! heavy concurrency on one key a few extra calls may slip through.

use crate::client::CacheClient;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::policy::FailMode;
use atrium_core::{SharedClock, SystemClock};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Persisted rate-limit state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateState {
    pub count: u32,
    /// Unix milliseconds of the last counted call; 0 if none.
    pub last: i64,
}

#[derive(Debug, Clone)]
pub struct Throttle {
    cache: Option<CacheClient>,
    clock: SharedClock,
    fail_mode: FailMode,
}

impl Throttle {
    /// Throttle over `cache`. `None` means every decision is degraded.
    pub fn new(cache: Option<CacheClient>) -> Self {
        Self {
            cache,
            clock: SystemClock::shared(),
            fail_mode: FailMode::default(),
        }
    }

    pub fn from_config(cache: Option<CacheClient>, config: &CacheConfig) -> Self {
        Self::new(cache).with_fail_mode(config.fail_mode)
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    /// Decide whether a call for `key` may proceed.
    ///
    /// Allows at most `max` calls per `window`, and when `min_interval` is
    /// non-zero, refuses calls closer than that to the previous counted one.
    /// `max == 0` disables the limit.
    pub async fn allow(&self, key: &str, window: Duration, max: u32, min_interval: Duration) -> bool {
        if max == 0 {
            return true;
        }
        let Some(cache) = &self.cache else {
            return self.degraded(key, "no cache configured");
        };

        let now = self.clock.now_millis();
        let mut state = match cache.get_json::<RateState>(key).await {
            Ok(found) => found.unwrap_or_default(),
            Err(CacheError::Serialization(reason)) => {
                tracing::debug!(key, reason = %reason, "Discarding undecodable throttle state");
                RateState::default()
            }
            Err(e) => return self.degraded(key, &e.to_string()),
        };

        if !min_interval.is_zero() && state.last != 0 {
            let elapsed = u64::try_from(now.saturating_sub(state.last)).unwrap_or(0);
            if Duration::from_millis(elapsed) < min_interval {
                tracing::debug!(key, elapsed_ms = elapsed, "Throttled by minimum interval");
                return false;
            }
        }

        state.count = state.count.saturating_add(1);
        state.last = now;

        let persisted = cache.set_json_with_ttl(key, &state, window).await;

        if state.count > max {
            tracing::debug!(key, count = state.count, max, "Throttled by window limit");
            return false;
        }
        match persisted {
            Ok(()) => true,
            Err(e) => self.degraded(key, &e.to_string()),
        }
    }

    fn degraded(&self, key: &str, cause: &str) -> bool {
        let allowed = self.fail_mode.allows();
        tracing::warn!(key, cause, fail_mode = %self.fail_mode, allowed, "Throttle degraded");
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use atrium_core::{Clock, ManualClock};
    use std::sync::Arc;

    fn throttle() -> (Throttle, CacheClient, ManualClock) {
        let clock = ManualClock::at_millis(1_700_000_000_000);
        let client = CacheClient::new(Arc::new(MemoryBackend::with_clock(clock.shared())));
        let throttle = Throttle::new(Some(client.clone())).with_clock(clock.shared());
        (throttle, client, clock)
    }

    #[tokio::test]
    async fn test_max_zero_is_unlimited() {
        let throttle = Throttle::new(None).with_fail_mode(FailMode::Closed);
        assert!(throttle.allow("k", Duration::from_secs(1), 0, Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_min_interval_blocks_without_counting() {
        let (throttle, client, clock) = throttle();
        let window = Duration::from_secs(60);
        let gap = Duration::from_secs(2);

        assert!(throttle.allow("k", window, 10, gap).await);
        clock.advance(Duration::from_secs(1));
        assert!(!throttle.allow("k", window, 10, gap).await);

        let state: RateState = client.get_json("k").await.unwrap().unwrap();
        assert_eq!(state.count, 1);

        clock.advance(Duration::from_secs(1));
        assert!(throttle.allow("k", window, 10, gap).await);
    }

    #[tokio::test]
    async fn test_state_records_millis() {
        let (throttle, client, clock) = throttle();
        throttle.allow("k", Duration::from_secs(5), 3, Duration::ZERO).await;
        let state: RateState = client.get_json("k").await.unwrap().unwrap();
        assert_eq!(state, RateState { count: 1, last: clock.now_millis() });
    }

    #[tokio::test]
    async fn test_undecodable_state_restarts_count() {
        let (throttle, client, _clock) = throttle();
        client.set("k", b"garbage").await.unwrap();
        assert!(throttle.allow("k", Duration::from_secs(5), 1, Duration::ZERO).await);
        let state: RateState = client.get_json("k").await.unwrap().unwrap();
        assert_eq!(state.count, 1);
    }

    #[tokio::test]
    async fn test_missing_client_follows_fail_mode() {
        let open = Throttle::new(None);
        let closed = Throttle::new(None).with_fail_mode(FailMode::Closed);
        assert!(open.allow("k", Duration::from_secs(1), 1, Duration::ZERO).await);
        assert!(!closed.allow("k", Duration::from_secs(1), 1, Duration::ZERO).await);
    }
}

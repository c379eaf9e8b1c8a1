//! First-writer-wins cooldown gate.
//!
//! The first caller for a key stores `{start}` with an atomic `add` and is
//! let through; everyone else is refused until the entry's TTL lapses and is
//! told how long remains. The store keeps whole seconds, so a sub-second
//! cooldown holds for a full second and `remaining` counts toward that.

use crate::client::{ttl_seconds, CacheClient};
use crate::config::CacheConfig;
use crate::policy::FailMode;
use atrium_core::{SharedClock, SystemClock};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CooldownState {
    /// Unix milliseconds when the cooldown began.
    start: i64,
}

#[derive(Debug, Clone)]
pub struct Cooldown {
    cache: Option<CacheClient>,
    clock: SharedClock,
    fail_mode: FailMode,
}

impl Cooldown {
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

    /// Try to start a cooldown of `duration` on `key`.
    ///
    /// Returns `(true, duration)` for the caller that started it and
    /// `(false, remaining)` for everyone else while it is active, where
    /// `remaining` runs out when the stored entry does.
    pub async fn check(&self, key: &str, duration: Duration) -> (bool, Duration) {
        if duration.is_zero() {
            return (true, Duration::ZERO);
        }
        let Some(cache) = &self.cache else {
            return self.degraded(key, duration, "no cache configured");
        };

        let now = self.clock.now_millis();
        let err = match cache.add_json(key, &CooldownState { start: now }, duration).await {
            Ok(()) => return (true, duration),
            Err(e) => e,
        };
        if !err.is_not_stored() {
            return self.degraded(key, duration, &err.to_string());
        }

        let existing = match cache.get_json::<CooldownState>(key).await {
            Ok(Some(state)) if state.start != 0 => state,
            Ok(_) => return (false, duration),
            Err(e) => {
                tracing::debug!(key, error = %e, "Could not read active cooldown");
                return (false, duration);
            }
        };

        let window = Duration::from_secs(u64::from(ttl_seconds(duration)));
        let elapsed = u64::try_from(now.saturating_sub(existing.start)).unwrap_or(0);
        (false, window.saturating_sub(Duration::from_millis(elapsed)))
    }

    fn degraded(&self, key: &str, duration: Duration, cause: &str) -> (bool, Duration) {
        let allowed = self.fail_mode.allows();
        tracing::warn!(key, cause, fail_mode = %self.fail_mode, allowed, "Cooldown degraded");
        (allowed, duration)
    }
}

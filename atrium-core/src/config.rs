//! Environment-driven configuration helpers.
//!
//! Every Atrium config struct exposes `from_env()` built on these readers.
//! Unset variables fall back to the supplied default; values that fail to
//! parse are logged at `warn` and also fall back, so a typo never prevents
//! startup.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised when a configuration value is structurally invalid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

// ============================================================================
// READERS
// ============================================================================

/// Read a non-empty string variable.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse a variable, falling back to `default` when unset or invalid.
pub fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        None => default,
        Some(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(var = name, value = %raw, error = %e, "Ignoring invalid configuration value");
                default
            }
        },
    }
}

/// Read a comma-separated list, dropping empty items.
pub fn env_list(name: &str) -> Vec<String> {
    env_string(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Read a duration expressed in whole seconds.
pub fn env_duration_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(name, default.as_secs()))
}

/// Read a duration expressed in milliseconds.
pub fn env_duration_millis(name: &str, default: Duration) -> Duration {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(env_parse(name, default_ms))
}

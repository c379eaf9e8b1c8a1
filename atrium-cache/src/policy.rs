//! Degradation policy for cache-backed coordination.

use atrium_core::ConfigError;
use std::fmt;
use std::str::FromStr;

/// What Throttle and Cooldown decide when the cache can't answer.
///
/// `Open` lets the call through and logs a warning; `Closed` refuses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    #[default]
    Open,
    Closed,
}

impl FailMode {
    /// The decision to return while degraded.
    pub fn allows(self) -> bool {
        matches!(self, FailMode::Open)
    }
}

impl FromStr for FailMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailMode::Open),
            "closed" => Ok(FailMode::Closed),
            other => Err(ConfigError::Invalid {
                var: "ATRIUM_COORDINATION_FAIL_MODE".to_string(),
                value: other.to_string(),
                reason: "expected `open` or `closed`".to_string(),
            }),
        }
    }
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailMode::Open => f.write_str("open"),
            FailMode::Closed => f.write_str("closed"),
        }
    }
}

//! ATRIUM Core - Shared Plumbing
//!
//! Small building blocks used by every other Atrium crate:
//! - [`Clock`] abstraction so coordination windows can be driven by tests
//! - environment-driven configuration helpers
//! - tracing subscriber initialization

pub mod clock;
pub mod config;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{env_duration_millis, env_duration_secs, env_list, env_parse, env_string, ConfigError};
pub use telemetry::{init_tracing, LogConfig, LogFormat, TelemetryError};

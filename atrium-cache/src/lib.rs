//! ATRIUM Cache - Coordination Primitives
//!
//! A thin client over a networked key/value cache plus two coordination
//! primitives built on top of it:
//!
//! - [`Throttle`]: windowed rate limiting with an optional minimum interval
//! - [`Cooldown`]: first-writer-wins gate built on atomic `add`
//!
//! Both primitives degrade according to a [`FailMode`] when the cache is
//! missing or unavailable instead of surfacing errors to the caller.

pub mod backend;
pub mod client;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod memory;
pub mod policy;
pub mod redis_backend;
pub mod throttle;

pub use backend::CacheBackend;
pub use client::{ttl_seconds, CacheClient};
pub use config::CacheConfig;
pub use cooldown::Cooldown;
pub use error::{CacheError, CacheResult};
pub use memory::MemoryBackend;
pub use policy::FailMode;
pub use redis_backend::RedisBackend;
pub use throttle::{RateState, Throttle};

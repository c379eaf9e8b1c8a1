//! ATRIUM Test Utilities
//!
//! Shared test infrastructure for the Atrium workspace:
//! - [`MockConnector`]: scripted database connector that records statements
//!   and injects failures
//! - [`FailingBackend`]: cache backend that is always unavailable
//! - SQLSTATE error constructors and fixtures
//! - Proptest generators

use async_trait::async_trait;
use atrium_cache::{CacheBackend, CacheClient, CacheError, CacheResult, MemoryBackend};
use atrium_core::ManualClock;
use atrium_db::{Connector, DbError, DbResult, Executor, ParamRef, PoolStatus};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// MOCK CONNECTOR
// ============================================================================

#[derive(Debug)]
struct Fault {
    prefix: String,
    error: DbError,
    remaining: u32,
}

#[derive(Debug, Default)]
struct MockState {
    statements: Mutex<Vec<String>>,
    faults: Mutex<Vec<Fault>>,
    acquire_faults: Mutex<VecDeque<DbError>>,
    acquired: AtomicU64,
    discarded: AtomicU64,
    closed: AtomicBool,
}

impl MockState {
    fn run(&self, sql: &str) -> DbResult<()> {
        lock(&self.statements).push(sql.to_string());

        let mut faults = lock(&self.faults);
        let hit = faults
            .iter_mut()
            .find(|f| f.remaining > 0 && sql.starts_with(&f.prefix));
        match hit {
            Some(fault) => {
                fault.remaining -= 1;
                Err(fault.error.clone())
            }
            None => Ok(()),
        }
    }
}

/// A connector with no server behind it.
///
/// Every statement is recorded in order and succeeds with no rows unless a
/// fault matches it. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next statement starting with `prefix`.
    pub fn fail_on(&self, prefix: &str, error: DbError) -> &Self {
        self.fail_on_times(prefix, error, 1)
    }

    /// Fail the next `times` statements starting with `prefix`.
    pub fn fail_on_times(&self, prefix: &str, error: DbError, times: u32) -> &Self {
        lock(&self.state.faults).push(Fault {
            prefix: prefix.to_string(),
            error,
            remaining: times,
        });
        self
    }

    /// Fail the next acquisition.
    pub fn fail_acquire(&self, error: DbError) -> &Self {
        lock(&self.state.acquire_faults).push_back(error);
        self
    }

    /// Every statement run so far, in order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.state.statements).clone()
    }

    /// How many recorded statements start with `prefix`.
    pub fn count_of(&self, prefix: &str) -> usize {
        lock(&self.state.statements)
            .iter()
            .filter(|s| s.starts_with(prefix))
            .count()
    }

    /// Successful acquisitions so far.
    pub fn acquired(&self) -> u64 {
        self.state.acquired.load(Ordering::SeqCst)
    }

    /// Connections closed instead of returned, see [`Executor::discard`].
    pub fn discarded(&self) -> u64 {
        self.state.discarded.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        lock(&self.state.statements).clear();
    }
}

struct MockExecutor {
    state: Arc<MockState>,
}

#[async_trait]
impl Executor for MockExecutor {
    async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        self.state.run(sql)
    }

    async fn execute(&self, sql: &str, _params: &[ParamRef<'_>]) -> DbResult<u64> {
        self.state.run(sql).map(|()| 0)
    }

    async fn query(&self, sql: &str, _params: &[ParamRef<'_>]) -> DbResult<Vec<atrium_db::Row>> {
        self.state.run(sql).map(|()| Vec::new())
    }

    fn discard(self: Box<Self>) {
        self.state.discarded.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn acquire(&self) -> DbResult<Box<dyn Executor>> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(DbError::PoolClosed);
        }
        if let Some(error) = lock(&self.state.acquire_faults).pop_front() {
            return Err(error);
        }
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockExecutor {
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: 0,
            available: 0,
            max_size: 16,
        }
    }
}

// ============================================================================
// DATABASE ERRORS
// ============================================================================

pub fn serialization_failure() -> DbError {
    DbError::from_sql_state("40001", "could not serialize access due to concurrent update")
}

pub fn deadlock() -> DbError {
    DbError::from_sql_state("40P01", "deadlock detected")
}

pub fn lock_not_available() -> DbError {
    DbError::from_sql_state("55P03", "could not obtain lock on row")
}

pub fn unique_violation() -> DbError {
    DbError::from_sql_state("23505", "duplicate key value violates unique constraint")
}

pub fn connection_lost() -> DbError {
    DbError::ConnectionLost("connection closed".to_string())
}

// ============================================================================
// CACHE
// ============================================================================

/// Cache backend where every call fails as unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingBackend;

fn unavailable<T>() -> CacheResult<T> {
    Err(CacheError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl CacheBackend for FailingBackend {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        unavailable()
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl_secs: Option<u32>) -> CacheResult<()> {
        unavailable()
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        unavailable()
    }

    async fn increment(&self, _key: &str, _delta: u64) -> CacheResult<Option<u64>> {
        unavailable()
    }

    async fn add(&self, _key: &str, _value: &[u8], _ttl_secs: u32) -> CacheResult<()> {
        unavailable()
    }

    async fn flush_all(&self) -> CacheResult<()> {
        unavailable()
    }
}

/// Client over [`FailingBackend`].
pub fn failing_cache() -> CacheClient {
    CacheClient::new(Arc::new(FailingBackend))
}

/// In-memory cache whose expiry follows the returned manual clock.
pub fn memory_cache() -> (CacheClient, ManualClock) {
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let client = CacheClient::new(Arc::new(MemoryBackend::with_clock(clock.shared())));
    (client, clock)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use atrium_db::IsolationLevel;
    use proptest::prelude::*;
    use std::time::Duration;

    /// Raw page numbers, including out-of-range values.
    pub fn arb_page() -> impl Strategy<Value = i64> {
        prop_oneof![Just(0i64), Just(-1i64), 1i64..10_000, any::<i32>().prop_map(i64::from)]
    }

    /// Raw page sizes, including out-of-range values.
    pub fn arb_page_size() -> impl Strategy<Value = i64> {
        prop_oneof![Just(0i64), -100i64..0, 1i64..=100, 101i64..100_000]
    }

    pub fn arb_isolation_level() -> impl Strategy<Value = IsolationLevel> {
        prop::sample::select(IsolationLevel::ALL.to_vec())
    }

    /// Durations from zero to about a day, with sub-second parts.
    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (0u64..86_400_000).prop_map(Duration::from_millis)
    }

    /// Keys the cache client accepts.
    pub fn arb_cache_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9:_-]{0,40}"
    }
}

//! Retrying transaction executor.
//!
//! [`AtomicProcess::exec`] runs a callback inside a transaction, committing
//! on success and rerunning the whole callback on serialization failures,
//! deadlocks, lock timeouts and dropped connections. The callback receives a
//! [`Tx`] handle that borrows the attempt's connection; data access inside
//! the callback passes it to [`Database::conn`] to join the transaction.
//!
//! Callbacks may run more than once before a commit sticks, so they must not
//! have side effects outside the database. A connection lost during COMMIT
//! is reported as [`DbError::CommitOutcomeUnknown`] and never rerun.
//!
//! If the `exec` future is dropped while a transaction is open, the
//! connection is discarded instead of going back to the pool; the server
//! rolls the transaction back when the socket closes.

use crate::db::Database;
use crate::error::{DbError, DbResult};
use crate::executor::{Executor, ParamRef};
use crate::isolation::IsolationLevel;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_postgres::Row;
use uuid::Uuid;

/// Attempts per transaction unless configured otherwise.
pub const DEFAULT_RETRIES: u32 = 3;

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct AtomicOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
    /// Total attempts, at least 1.
    pub retries: u32,
    /// Pause before each retry.
    pub backoff: Duration,
    /// Flipping this to `true` aborts the transaction.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Default for AtomicOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::Default,
            read_only: false,
            retries: DEFAULT_RETRIES,
            backoff: Duration::ZERO,
            cancel: None,
        }
    }
}

impl AtomicOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Total attempts. Zero is treated as one.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn cancel_on(mut self, signal: watch::Receiver<bool>) -> Self {
        self.cancel = Some(signal);
        self
    }
}

// ============================================================================
// TRANSACTION HANDLE
// ============================================================================

/// Handle to one attempt's open transaction.
#[derive(Clone, Copy)]
pub struct Tx<'t> {
    conn: &'t dyn Executor,
    id: Uuid,
    attempt: u32,
}

impl fmt::Debug for Tx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

impl<'t> Tx<'t> {
    fn new(conn: &'t dyn Executor, attempt: u32) -> Self {
        Self {
            conn,
            id: Uuid::now_v7(),
            attempt,
        }
    }

    /// Unique per attempt.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn executor(&self) -> &'t dyn Executor {
        self.conn
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Default)]
struct TxCounters {
    started: AtomicU64,
    committed: AtomicU64,
    retried: AtomicU64,
    exhausted: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of transaction outcomes since the process was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStats {
    /// Top-level `exec` calls.
    pub started: u64,
    pub committed: u64,
    /// Attempts rerun after a retryable failure.
    pub retried: u64,
    /// Calls that ran out of attempts.
    pub exhausted: u64,
    /// Calls that ended on a terminal error, cancellation included.
    pub failed: u64,
}

// ============================================================================
// ATOMIC PROCESS
// ============================================================================

#[derive(Debug, Clone)]
pub struct AtomicProcess {
    db: Database,
    stats: Arc<TxCounters>,
}

impl AtomicProcess {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            stats: Arc::new(TxCounters::default()),
        }
    }

    pub fn stats(&self) -> TxStats {
        TxStats {
            started: self.stats.started.load(Ordering::Relaxed),
            committed: self.stats.committed.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
            exhausted: self.stats.exhausted.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Run `callback` in a new transaction.
    pub async fn exec<T, F>(&self, callback: F, options: AtomicOptions) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnMut(Tx<'t>) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        self.exec_within(None, callback, options).await
    }

    /// Run `callback` in `within`'s transaction, or a new one if `None`.
    ///
    /// Joining an existing transaction runs the callback exactly once with
    /// no BEGIN, COMMIT or retry; the outermost caller owns those.
    pub async fn exec_within<'o, T, F>(
        &self,
        within: Option<&Tx<'o>>,
        mut callback: F,
        options: AtomicOptions,
    ) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnMut(Tx<'t>) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        if let Some(outer) = within {
            if options.isolation != IsolationLevel::Default || options.read_only {
                tracing::debug!(
                    tx = %outer.id(),
                    isolation = %options.isolation,
                    read_only = options.read_only,
                    "Joined transaction keeps the outer isolation settings"
                );
            }
            return callback(*outer).await;
        }

        self.stats.started.fetch_add(1, Ordering::Relaxed);
        let isolation = match options.isolation.postgres_clause() {
            Ok(clause) => clause,
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        let retries = options.retries.max(1);
        let mut cancel = options.cancel.clone();
        let mut last = None;

        for attempt in 1..=retries {
            if attempt > 1 && !options.backoff.is_zero() {
                pause(options.backoff, cancel.as_mut()).await;
            }
            if is_cancelled(cancel.as_ref()) {
                tracing::debug!(attempt, "Transaction cancelled before attempt");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return Err(DbError::Cancelled);
            }

            let outcome = self
                .attempt(attempt, isolation, options.read_only, cancel.as_mut(), &mut callback)
                .await;

            match outcome {
                Ok(value) => {
                    self.stats.committed.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, retries, error = %e, "Transaction attempt failed, retryable");
                    if attempt < retries {
                        self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    }
                    last = Some(e);
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "Transaction failed");
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }

        self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
        let last = last.unwrap_or_else(|| DbError::Other("no transaction attempt ran".to_string()));
        tracing::error!(attempts = retries, error = %last, "Transaction retries exhausted");
        Err(DbError::RetriesExhausted {
            attempts: retries,
            last: Box::new(last),
        })
    }

    async fn attempt<T, F>(
        &self,
        attempt: u32,
        isolation: Option<&'static str>,
        read_only: bool,
        cancel: Option<&mut watch::Receiver<bool>>,
        callback: &mut F,
    ) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnMut(Tx<'t>) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        let guard = OpenTransaction::new(self.db.acquire().await?);
        let conn = guard.executor();
        conn.batch_execute("BEGIN").await?;
        let tx = Tx::new(conn, attempt);
        tracing::debug!(tx = %tx.id(), attempt, "Transaction started");

        let result = async {
            if let Some(level) = isolation {
                conn.batch_execute(&format!("SET TRANSACTION ISOLATION LEVEL {level}"))
                    .await?;
            }
            if read_only {
                conn.batch_execute("SET TRANSACTION READ ONLY").await?;
            }

            let value = match cancel {
                Some(signal) => {
                    tokio::select! {
                        biased;
                        _ = wait_cancelled(signal) => Err(DbError::Cancelled),
                        result = callback(tx) => result,
                    }
                }
                None => callback(tx).await,
            }?;

            conn.batch_execute("COMMIT").await.map_err(|e| {
                if e.is_connection_loss() {
                    DbError::CommitOutcomeUnknown(e.to_string())
                } else {
                    e
                }
            })?;
            Ok(value)
        }
        .await;

        match &result {
            Ok(_) => {
                guard.finish();
                tracing::debug!(tx = %tx.id(), attempt, "Transaction committed");
            }
            Err(e) => match conn.batch_execute("ROLLBACK").await {
                Ok(()) => {
                    guard.finish();
                    tracing::debug!(tx = %tx.id(), cause = %e, "Transaction rolled back");
                }
                Err(rollback) => {
                    tracing::warn!(tx = %tx.id(), error = %rollback, cause = %e, "Rollback failed");
                }
            },
        }
        result
    }
}

// ============================================================================
// CONNECTION GUARD
// ============================================================================

/// Owns an attempt's connection while its transaction may be open.
///
/// Dropped before [`finish`](Self::finish), e.g. when the `exec` future is
/// abandoned mid-callback or a rollback fails, the connection is discarded
/// rather than returned to the pool.
struct OpenTransaction {
    conn: Box<dyn Executor>,
    open: AtomicBool,
}

impl OpenTransaction {
    fn new(conn: Box<dyn Executor>) -> Self {
        Self {
            conn,
            open: AtomicBool::new(true),
        }
    }

    fn executor(&self) -> &dyn Executor {
        self.conn.as_ref()
    }

    fn finish(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Drop for OpenTransaction {
    fn drop(&mut self) {
        if self.open.load(Ordering::Acquire) {
            tracing::warn!("Transaction left open, discarding its connection");
            std::mem::replace(&mut self.conn, Box::new(Discarded)).discard();
        }
    }
}

/// Placeholder left behind once a connection has been discarded.
struct Discarded;

#[async_trait::async_trait]
impl Executor for Discarded {
    async fn batch_execute(&self, _sql: &str) -> DbResult<()> {
        Err(DbError::ConnectionLost("connection discarded".to_string()))
    }

    async fn execute(&self, _sql: &str, _params: &[ParamRef<'_>]) -> DbResult<u64> {
        Err(DbError::ConnectionLost("connection discarded".to_string()))
    }

    async fn query(&self, _sql: &str, _params: &[ParamRef<'_>]) -> DbResult<Vec<Row>> {
        Err(DbError::ConnectionLost("connection discarded".to_string()))
    }

    fn discard(self: Box<Self>) {}
}

fn is_cancelled(signal: Option<&watch::Receiver<bool>>) -> bool {
    signal.is_some_and(|rx| *rx.borrow())
}

/// Resolves once the signal reads `true`. Never resolves if the sender is
/// dropped without cancelling.
async fn wait_cancelled(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn pause(delay: Duration, cancel: Option<&mut watch::Receiver<bool>>) {
    match cancel {
        Some(signal) => {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_cancelled(signal) => {}
            }
        }
        None => tokio::time::sleep(delay).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = AtomicOptions::default();
        assert_eq!(options.isolation, IsolationLevel::Default);
        assert!(!options.read_only);
        assert_eq!(options.retries, 3);
        assert_eq!(options.backoff, Duration::ZERO);
        assert!(options.cancel.is_none());
    }

    #[test]
    fn test_retries_floor_is_one() {
        assert_eq!(AtomicOptions::new().retries(0).retries, 1);
        assert_eq!(AtomicOptions::new().retries(7).retries, 7);
    }

    #[tokio::test]
    async fn test_wait_cancelled_resolves_on_flip() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_cancelled(&mut rx).await });
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }

    #[test]
    fn test_is_cancelled_reads_current_value() {
        let (tx, rx) = watch::channel(false);
        assert!(!is_cancelled(Some(&rx)));
        tx.send(true).unwrap();
        assert!(is_cancelled(Some(&rx)));
        assert!(!is_cancelled(None));
    }
}

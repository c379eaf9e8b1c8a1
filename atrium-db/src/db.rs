//! Connection manager.
//!
//! [`Database`] owns the pool. [`Database::conn`] hands out a [`Session`]:
//! bound to the caller's transaction when one is passed in, otherwise on a
//! freshly checked-out connection. Sessions carry the composed [`Query`]
//! options and log every statement they run.

use crate::atomic::{AtomicProcess, Tx};
use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::executor::{Connector, Executor, Param, ParamRef, PoolStatus};
use crate::query::{Query, QueryOption, Statement};
use crate::schema::Schema;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_postgres::Row;
use uuid::Uuid;

// ============================================================================
// DATABASE
// ============================================================================

/// Shared handle to the connection pool.
#[derive(Clone)]
pub struct Database {
    connector: Arc<dyn Connector>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("status", &self.connector.status())
            .finish()
    }
}

impl Database {
    /// Build the pool, wait for the server and ensure extensions.
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        let pool = config.create_pool()?;
        Self::connect_with(pool, config).await
    }

    /// Like [`connect`](Self::connect) over an existing connector.
    ///
    /// Reachability is checked up to `config.connect_attempts` times; attempt
    /// `n` failing waits `n * config.connect_backoff` before the next.
    pub async fn connect_with(connector: impl Connector, config: &DbConfig) -> DbResult<Self> {
        let db = Self::from_connector(connector);
        let attempts = config.connect_attempts.max(1);

        let mut attempt = 1;
        loop {
            match db.health_check().await {
                Ok(()) => break,
                Err(e) if attempt < attempts => {
                    let delay = config.connect_backoff * attempt;
                    tracing::warn!(
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Database unreachable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempts, error = %e, "Database unreachable, giving up");
                    return Err(e);
                }
            }
        }

        db.ensure_extensions(&config.extensions).await;
        tracing::info!(attempt, max_size = db.pool_status().max_size, "Database connected");
        Ok(db)
    }

    /// Wrap a connector without probing it.
    pub fn from_connector(connector: impl Connector) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }

    /// Check a raw connection out of the pool.
    pub async fn acquire(&self) -> DbResult<Box<dyn Executor>> {
        self.connector.acquire().await
    }

    /// A session on `within`'s transaction, or on a pooled connection when
    /// `within` is `None`, with `options` applied.
    pub async fn conn<'a>(
        &self,
        within: Option<&Tx<'a>>,
        options: Vec<QueryOption>,
    ) -> DbResult<Session<'a>> {
        let (conn, tx_id) = match within {
            Some(tx) => (Conn::Tx(tx.executor()), Some(tx.id())),
            None => (Conn::Owned(self.acquire().await?), None),
        };
        Ok(Session {
            conn,
            query: Query::new().apply(options),
            tx_id,
        })
    }

    /// Executor for the whole transaction lifecycle.
    pub fn atomic(&self) -> AtomicProcess {
        AtomicProcess::new(self.clone())
    }

    /// Stop handing out connections. Checked-out connections finish normally.
    pub fn close(&self) {
        self.connector.close();
        tracing::info!("Database pool closed");
    }

    /// Run `SELECT 1` on a pooled connection.
    pub async fn health_check(&self) -> DbResult<()> {
        let conn = self.acquire().await?;
        conn.batch_execute("SELECT 1").await
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.connector.status()
    }

    /// Apply each schema's DDL in order on one connection.
    pub async fn auto_migrate(&self, schemas: &[&Schema]) -> DbResult<()> {
        let conn = self.acquire().await?;
        for schema in schemas {
            conn.batch_execute(schema.ddl).await.map_err(|e| {
                tracing::error!(table = schema.table, error = %e, "Migration failed");
                e
            })?;
            tracing::info!(table = schema.table, "Schema migrated");
        }
        Ok(())
    }

    async fn ensure_extensions(&self, extensions: &[String]) {
        for name in extensions {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
                tracing::warn!(extension = %name, "Skipping extension with unexpected name");
                continue;
            }
            let sql = format!("CREATE EXTENSION IF NOT EXISTS {name}");
            let result = match self.acquire().await {
                Ok(conn) => conn.batch_execute(&sql).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => tracing::debug!(extension = %name, "Extension ensured"),
                Err(e) => tracing::warn!(extension = %name, error = %e, "Could not ensure extension"),
            }
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

enum Conn<'a> {
    Tx(&'a dyn Executor),
    Owned(Box<dyn Executor>),
}

/// Rows affected by a write, plus any `RETURNING` rows.
#[derive(Debug, Default)]
pub struct WriteResult {
    pub affected: u64,
    pub returned: Vec<Row>,
}

/// A connection with query options attached.
pub struct Session<'a> {
    conn: Conn<'a>,
    query: Query,
    tx_id: Option<Uuid>,
}

impl fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tx", &self.tx_id)
            .field("query", &self.query)
            .finish()
    }
}

impl<'a> Session<'a> {
    /// Apply further options.
    pub fn with(mut self, options: Vec<QueryOption>) -> Self {
        self.query = std::mem::take(&mut self.query).apply(options);
        self
    }

    pub fn query_options(&self) -> &Query {
        &self.query
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_id.is_some()
    }

    fn executor(&self) -> &dyn Executor {
        match &self.conn {
            Conn::Tx(conn) => *conn,
            Conn::Owned(conn) => conn.as_ref(),
        }
    }

    fn log_result<T>(&self, sql: &str, started: Instant, result: &DbResult<T>, rows: impl Fn(&T) -> u64) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(value) => tracing::debug!(
                sql,
                elapsed_ms,
                rows = rows(value),
                tx = ?self.tx_id,
                "Statement executed"
            ),
            Err(e) => tracing::warn!(sql, elapsed_ms, tx = ?self.tx_id, error = %e, "Statement failed"),
        }
    }

    // ========================================================================
    // RAW STATEMENTS
    // ========================================================================

    pub async fn execute(&self, sql: &str, params: &[ParamRef<'_>]) -> DbResult<u64> {
        let started = Instant::now();
        let result = self.executor().execute(sql, params).await;
        self.log_result(sql, started, &result, |n| *n);
        result
    }

    pub async fn query(&self, sql: &str, params: &[ParamRef<'_>]) -> DbResult<Vec<Row>> {
        let started = Instant::now();
        let result = self.executor().query(sql, params).await;
        self.log_result(sql, started, &result, |rows| rows.len() as u64);
        result
    }

    pub async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        let started = Instant::now();
        let result = self.executor().batch_execute(sql).await;
        self.log_result(sql, started, &result, |_| 0);
        result
    }

    async fn run_query(&self, stmt: Statement) -> DbResult<Vec<Row>> {
        self.query(&stmt.sql, &stmt.param_refs()).await
    }

    async fn run_write(&self, stmt: Statement) -> DbResult<WriteResult> {
        if self.query.returning().is_empty() {
            let affected = self.execute(&stmt.sql, &stmt.param_refs()).await?;
            Ok(WriteResult {
                affected,
                returned: Vec::new(),
            })
        } else {
            let returned = self.run_query(stmt).await?;
            Ok(WriteResult {
                affected: returned.len() as u64,
                returned,
            })
        }
    }

    // ========================================================================
    // COMPOSED STATEMENTS
    // ========================================================================

    pub async fn select(&self, table: &str) -> DbResult<Vec<Row>> {
        self.run_query(self.query.select_sql(table)).await
    }

    pub async fn count(&self, table: &str) -> DbResult<i64> {
        let rows = self.run_query(self.query.count_sql(table)).await?;
        match rows.first() {
            Some(row) => row.try_get(0).map_err(|e| DbError::Decode(e.to_string())),
            None => Ok(0),
        }
    }

    /// Run an aggregate `select`, see [`Query::aggregate_sql`].
    pub async fn aggregate(&self, table: &str, select: &str, group_by: Option<&str>) -> DbResult<Vec<Row>> {
        self.run_query(self.query.aggregate_sql(table, select, group_by)).await
    }

    pub async fn delete(&self, table: &str) -> DbResult<WriteResult> {
        self.run_write(self.query.delete_sql(table)?).await
    }

    pub async fn update(&self, table: &str, assignments: &[(&'static str, Param)]) -> DbResult<WriteResult> {
        self.run_write(self.query.update_sql(table, assignments)?).await
    }

    pub async fn insert(&self, table: &str, values: &[(&'static str, Param)]) -> DbResult<WriteResult> {
        self.run_write(self.query.insert_sql(table, values)?).await
    }
}

//! Connection seams.
//!
//! [`Executor`] is anything statements can run on: a pooled connection or a
//! connection with an open transaction. [`Connector`] hands out executors.
//! The pool implements both, and tests substitute a scripted connector.

use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

/// An owned, shareable query parameter.
pub type Param = Arc<dyn ToSql + Send + Sync>;

/// A borrowed parameter, as the driver takes it.
pub type ParamRef<'a> = &'a (dyn ToSql + Sync);

/// Wrap a value as a [`Param`].
pub fn param<T: ToSql + Send + Sync + 'static>(value: T) -> Param {
    Arc::new(value)
}

/// A live connection statements can be sent to.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run one or more statements without parameters or results.
    async fn batch_execute(&self, sql: &str) -> DbResult<()>;

    /// Run a statement and return the affected row count.
    async fn execute(&self, sql: &str, params: &[ParamRef<'_>]) -> DbResult<u64>;

    /// Run a statement and collect its rows.
    async fn query(&self, sql: &str, params: &[ParamRef<'_>]) -> DbResult<Vec<Row>>;

    /// Close the connection instead of returning it to its source.
    ///
    /// Called when the connection may still be inside a transaction, so the
    /// server rolls it back on disconnect and no later checkout inherits it.
    fn discard(self: Box<Self>);
}

/// Source of connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Check a connection out. It returns to the source when dropped.
    async fn acquire(&self) -> DbResult<Box<dyn Executor>>;

    /// Stop handing out connections.
    fn close(&self);

    fn status(&self) -> PoolStatus;
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently open.
    pub size: usize,
    /// Open connections not checked out.
    pub available: usize,
    pub max_size: usize,
}

// ============================================================================
// DEADPOOL IMPLEMENTATIONS
// ============================================================================

#[async_trait]
impl Executor for deadpool_postgres::Object {
    async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        let client: &tokio_postgres::Client = self;
        client.batch_execute(sql).await.map_err(DbError::from)
    }

    async fn execute(&self, sql: &str, params: &[ParamRef<'_>]) -> DbResult<u64> {
        let client: &tokio_postgres::Client = self;
        client.execute(sql, params).await.map_err(DbError::from)
    }

    async fn query(&self, sql: &str, params: &[ParamRef<'_>]) -> DbResult<Vec<Row>> {
        let client: &tokio_postgres::Client = self;
        client.query(sql, params).await.map_err(DbError::from)
    }

    fn discard(self: Box<Self>) {
        // Detached from the pool; dropping the client closes the socket.
        drop(deadpool_postgres::Object::take(*self));
    }
}

#[async_trait]
impl Connector for deadpool_postgres::Pool {
    async fn acquire(&self) -> DbResult<Box<dyn Executor>> {
        let conn = self.get().await?;
        Ok(Box::new(conn))
    }

    fn close(&self) {
        deadpool_postgres::Pool::close(self);
    }

    fn status(&self) -> PoolStatus {
        let status = deadpool_postgres::Pool::status(self);
        PoolStatus {
            size: status.size,
            available: status.available,
            max_size: status.max_size,
        }
    }
}

//! ATRIUM DB - Transactional Execution over PostgreSQL
//!
//! - [`Database`]: pooled connections and query sessions
//! - [`query`]: composable options (locking, pagination, ordering, filters)
//! - [`AtomicProcess`]: retrying, isolation-aware transactions
//! - [`Repository`]: typed access to a table, with sum/count/time-series aggregates
//!
//! ```ignore
//! let db = Database::connect(&DbConfig::from_env()).await?;
//! let total = db
//!     .atomic()
//!     .exec(
//!         |tx| {
//!             let db = db.clone();
//!             async move {
//!                 let session = db.conn(Some(&tx), vec![query::lock(Locking::Update)]).await?;
//!                 session.count("orders").await
//!             }
//!             .boxed()
//!         },
//!         AtomicOptions::new().isolation(IsolationLevel::Serializable),
//!     )
//!     .await?;
//! ```

pub mod aggregate;
pub mod atomic;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod isolation;
pub mod list;
pub mod query;
pub mod repository;
pub mod schema;

pub use aggregate::{Granularity, KeyValue, TimeBucket};
pub use atomic::{AtomicOptions, AtomicProcess, Tx, TxStats, DEFAULT_RETRIES};
pub use config::DbConfig;
pub use db::{Database, Session, WriteResult};
pub use error::{DbError, DbResult};
pub use executor::{param, Connector, Executor, Param, ParamRef, PoolStatus};
pub use isolation::IsolationLevel;
pub use list::{ListRequest, DEFAULT_ORDER};
pub use query::{Locking, Pagination, Query, QueryOption, Statement, Wait};
pub use repository::{column, Model, Repository};
pub use schema::{Field, FieldMap, Schema};

/// Re-exported so callers can name SQLSTATEs and rows without a direct driver dependency.
pub use tokio_postgres::{error::SqlState, Row};

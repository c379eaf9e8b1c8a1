//! Typed table access.
//!
//! A [`Repository`] pairs a [`Model`] with the [`Database`] and runs composed
//! query options against the model's table, inside the caller's transaction
//! when one is passed.
//!
//! Bulk deletes and updates need a filter; pass [`query::all_rows`] to touch
//! the whole table on purpose.

use crate::aggregate::{Granularity, KeyValue, TimeBucket};
use crate::atomic::Tx;
use crate::db::Database;
use crate::error::{DbError, DbResult};
use crate::executor::Param;
use crate::query::{self, QueryOption};
use crate::schema::{Field, Schema};
use std::marker::PhantomData;
use tokio_postgres::Row;

/// A row type backed by one table.
pub trait Model: Sized + Send {
    fn schema() -> &'static Schema;

    fn from_row(row: &Row) -> DbResult<Self>;
}

/// Decode a column, mapping driver failures to [`DbError::Decode`].
pub fn column<'r, T>(row: &'r Row, name: &str) -> DbResult<T>
where
    T: tokio_postgres::types::FromSql<'r>,
{
    row.try_get(name)
        .map_err(|e| DbError::Decode(format!("column {name}: {e}")))
}

pub struct Repository<M> {
    db: Database,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Repository<M> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _model: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for Repository<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("model", &std::any::type_name::<M>())
            .finish()
    }
}

impl<M: Model> Repository<M> {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            _model: PhantomData,
        }
    }

    pub fn table(&self) -> &'static str {
        M::schema().table
    }

    fn decode(rows: &[Row]) -> DbResult<Vec<M>> {
        rows.iter().map(M::from_row).collect()
    }

    pub async fn find_many(&self, within: Option<&Tx<'_>>, options: Vec<QueryOption>) -> DbResult<Vec<M>> {
        let session = self.db.conn(within, options).await?;
        let rows = session.select(self.table()).await?;
        Self::decode(&rows)
    }

    /// First matching row, or [`DbError::NotFound`].
    pub async fn find_one(&self, within: Option<&Tx<'_>>, mut options: Vec<QueryOption>) -> DbResult<M> {
        options.push(query::limit(1));
        let session = self.db.conn(within, options).await?;
        let rows = session.select(self.table()).await?;
        match rows.first() {
            Some(row) => M::from_row(row),
            None => Err(DbError::NotFound),
        }
    }

    pub async fn count(&self, within: Option<&Tx<'_>>, options: Vec<QueryOption>) -> DbResult<i64> {
        let session = self.db.conn(within, options).await?;
        session.count(self.table()).await
    }

    /// Delete matching rows, returning how many went.
    ///
    /// Fails with [`DbError::MissingWhereClause`] when `options` carry no filter.
    pub async fn delete_many(&self, within: Option<&Tx<'_>>, options: Vec<QueryOption>) -> DbResult<u64> {
        let session = self.db.conn(within, options).await?;
        Ok(session.delete(self.table()).await?.affected)
    }

    /// Apply `assignments` to matching rows and return them as updated.
    ///
    /// Same filter rule as [`Repository::delete_many`].
    pub async fn update_many(
        &self,
        within: Option<&Tx<'_>>,
        assignments: &[(&'static str, Param)],
        mut options: Vec<QueryOption>,
    ) -> DbResult<Vec<M>> {
        options.push(query::returning(&["*"]));
        let session = self.db.conn(within, options).await?;
        let written = session.update(self.table(), assignments).await?;
        Self::decode(&written.returned)
    }

    /// Insert one row and return it as stored.
    pub async fn insert(&self, within: Option<&Tx<'_>>, values: &[(&'static str, Param)]) -> DbResult<M> {
        let session = self.db.conn(within, vec![query::returning(&["*"])]).await?;
        let written = session.insert(self.table(), values).await?;
        match written.returned.first() {
            Some(row) => M::from_row(row),
            None => Err(DbError::Other(format!("insert into {} returned no row", self.table()))),
        }
    }

    /// `SUM(field)` over matching rows, 0 when none match.
    pub async fn sum(&self, within: Option<&Tx<'_>>, field: &Field, options: Vec<QueryOption>) -> DbResult<f64> {
        self.scalar(within, &format!("COALESCE(SUM({}), 0)::float8", field.column), options)
            .await
    }

    /// `AVG(field)` over matching rows, 0 when none match.
    pub async fn avg(&self, within: Option<&Tx<'_>>, field: &Field, options: Vec<QueryOption>) -> DbResult<f64> {
        self.scalar(within, &format!("COALESCE(AVG({}), 0)::float8", field.column), options)
            .await
    }

    /// Row count per distinct `group` value.
    pub async fn count_by(
        &self,
        within: Option<&Tx<'_>>,
        group: &Field,
        options: Vec<QueryOption>,
    ) -> DbResult<Vec<KeyValue>> {
        self.grouped(within, group, "COUNT(*)::float8", options).await
    }

    pub async fn sum_by(
        &self,
        within: Option<&Tx<'_>>,
        group: &Field,
        field: &Field,
        options: Vec<QueryOption>,
    ) -> DbResult<Vec<KeyValue>> {
        let value = format!("COALESCE(SUM({}), 0)::float8", field.column);
        self.grouped(within, group, &value, options).await
    }

    pub async fn avg_by(
        &self,
        within: Option<&Tx<'_>>,
        group: &Field,
        field: &Field,
        options: Vec<QueryOption>,
    ) -> DbResult<Vec<KeyValue>> {
        let value = format!("COALESCE(AVG({}), 0)::float8", field.column);
        self.grouped(within, group, &value, options).await
    }

    /// `SUM(field)` per `granularity` bucket of the `timestamptz` column `at`,
    /// oldest bucket first. Empty buckets are absent.
    pub async fn time_series_sum(
        &self,
        within: Option<&Tx<'_>>,
        field: &Field,
        at: &Field,
        granularity: Granularity,
        options: Vec<QueryOption>,
    ) -> DbResult<Vec<TimeBucket>> {
        let value = format!("COALESCE(SUM({}), 0)::float8", field.column);
        self.series(within, at, granularity, &value, options).await
    }

    /// Row count per `granularity` bucket of `at`.
    pub async fn time_series_count(
        &self,
        within: Option<&Tx<'_>>,
        at: &Field,
        granularity: Granularity,
        options: Vec<QueryOption>,
    ) -> DbResult<Vec<TimeBucket>> {
        self.series(within, at, granularity, "COUNT(*)::float8", options).await
    }

    async fn scalar(&self, within: Option<&Tx<'_>>, select: &str, options: Vec<QueryOption>) -> DbResult<f64> {
        let session = self.db.conn(within, options).await?;
        let rows = session.aggregate(self.table(), select, None).await?;
        match rows.first() {
            Some(row) => row
                .try_get(0)
                .map_err(|e| DbError::Decode(format!("aggregate: {e}"))),
            None => Ok(0.0),
        }
    }

    async fn grouped(
        &self,
        within: Option<&Tx<'_>>,
        group: &Field,
        value: &str,
        options: Vec<QueryOption>,
    ) -> DbResult<Vec<KeyValue>> {
        let select = format!("{}::text AS key, {value} AS value", group.column);
        let session = self.db.conn(within, options).await?;
        let rows = session.aggregate(self.table(), &select, Some(group.column)).await?;
        rows.iter()
            .map(|row| {
                Ok(KeyValue {
                    key: column(row, "key")?,
                    value: column(row, "value")?,
                })
            })
            .collect()
    }

    async fn series(
        &self,
        within: Option<&Tx<'_>>,
        at: &Field,
        granularity: Granularity,
        value: &str,
        options: Vec<QueryOption>,
    ) -> DbResult<Vec<TimeBucket>> {
        let select = format!(
            "date_trunc('{}', {}) AS bucket, {value} AS value",
            granularity.bucket(),
            at.column
        );
        let session = self.db.conn(within, options).await?;
        let rows = session.aggregate(self.table(), &select, Some("bucket")).await?;
        rows.iter()
            .map(|row| {
                Ok(TimeBucket {
                    at: column(row, "bucket")?,
                    value: column(row, "value")?,
                })
            })
            .collect()
    }
}

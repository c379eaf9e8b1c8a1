//! Composable query options.
//!
//! A [`QueryOption`] is a boxed `Query -> Query` function. Options are
//! applied left to right and the resulting [`Query`] renders SQL for a
//! table, collecting bound parameters in placeholder order.
//!
//! Identifiers (columns, tables, join clauses) are always `&'static str` or
//! resolved through a [`FieldMap`]; caller-supplied values only ever travel
//! as bound parameters.

use crate::error::{DbError, DbResult};
use crate::executor::{Param, ParamRef};
use crate::schema::FieldMap;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use tokio_postgres::types::ToSql;

/// Default page size when none (or an invalid one) is requested.
pub const DEFAULT_PAGE_SIZE: i64 = 30;
/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: i64 = 100;
/// Longest accepted search term, in characters, after normalization.
pub const MAX_SEARCH_TERM_LEN: usize = 128;

/// A deferred modification of a [`Query`].
pub type QueryOption = Box<dyn FnOnce(Query) -> Query + Send>;

// ============================================================================
// CLAUSES
// ============================================================================

/// Row lock strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locking {
    Update,
    NoKeyUpdate,
    Share,
    KeyShare,
}

impl Locking {
    fn sql(self) -> &'static str {
        match self {
            Locking::Update => "FOR UPDATE",
            Locking::NoKeyUpdate => "FOR NO KEY UPDATE",
            Locking::Share => "FOR SHARE",
            Locking::KeyShare => "FOR KEY SHARE",
        }
    }
}

/// What to do when a row is already locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wait {
    #[default]
    Block,
    SkipLocked,
    NoWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockClause {
    pub strength: Locking,
    pub wait: Wait,
}

/// Normalized page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    /// Clamp a raw request: `page < 1` becomes 1, `page_size <= 0` becomes
    /// [`DEFAULT_PAGE_SIZE`], and anything above [`MAX_PAGE_SIZE`] is capped.
    pub fn new(page: i64, page_size: i64) -> Self {
        let page = page.max(1);
        let page_size = if page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size.min(MAX_PAGE_SIZE)
        };
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: &'static str,
    pub descending: bool,
}

/// A WHERE predicate with `?` placeholders and their values.
#[derive(Debug, Clone)]
pub struct Condition {
    template: String,
    params: Vec<Param>,
}

impl Condition {
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

/// Rendered SQL plus its parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    /// Borrow the parameters in the form the driver takes.
    pub fn param_refs(&self) -> Vec<ParamRef<'_>> {
        self.params
            .iter()
            .map(|p| p.as_ref() as ParamRef<'_>)
            .collect()
    }
}

// ============================================================================
// QUERY
// ============================================================================

/// Accumulated query modifiers.
#[derive(Debug, Clone, Default)]
pub struct Query {
    lock: Option<LockClause>,
    limit: Option<i64>,
    offset: Option<i64>,
    order: Vec<OrderTerm>,
    joins: Vec<&'static str>,
    preload: Vec<String>,
    returning: Vec<&'static str>,
    conditions: Vec<Condition>,
    all_rows: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply options in order.
    pub fn apply<I>(self, options: I) -> Self
    where
        I: IntoIterator<Item = QueryOption>,
    {
        options.into_iter().fold(self, |query, option| option(query))
    }

    // Builders, usable directly from `scope` closures.

    pub fn locked(mut self, strength: Locking, wait: Wait) -> Self {
        self.lock = Some(LockClause { strength, wait });
        self
    }

    pub fn paginated(mut self, pagination: Pagination) -> Self {
        self.limit = Some(pagination.limit());
        self.offset = Some(pagination.offset());
        self
    }

    pub fn limited(mut self, limit: i64) -> Self {
        self.limit = Some(limit.max(0));
        self
    }

    pub fn ordered(mut self, terms: impl IntoIterator<Item = OrderTerm>) -> Self {
        self.order.extend(terms);
        self
    }

    pub fn joined(mut self, clause: &'static str) -> Self {
        self.joins.push(clause);
        self
    }

    pub fn preloading(mut self, association: impl Into<String>) -> Self {
        self.preload.push(association.into());
        self
    }

    pub fn returning_columns(mut self, columns: &[&'static str]) -> Self {
        self.returning.extend_from_slice(columns);
        self
    }

    /// Allow DELETE and UPDATE to run without any filter.
    pub fn unfiltered(mut self) -> Self {
        self.all_rows = true;
        self
    }

    /// Add a predicate. Each `?` in `template` binds the next value.
    pub fn filter(self, template: &'static str, params: Vec<Param>) -> Self {
        self.push_condition(template.to_string(), params)
    }

    fn push_condition(mut self, template: String, params: Vec<Param>) -> Self {
        self.conditions.push(Condition { template, params });
        self
    }

    // Accessors

    pub fn lock(&self) -> Option<LockClause> {
        self.lock
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    pub fn order(&self) -> &[OrderTerm] {
        &self.order
    }

    pub fn joins(&self) -> &[&'static str] {
        &self.joins
    }

    /// Associations requested for eager loading.
    pub fn preloads(&self) -> &[String] {
        &self.preload
    }

    pub fn returning(&self) -> &[&'static str] {
        &self.returning
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    // ========================================================================
    // RENDERING
    // ========================================================================

    /// `SELECT table.* FROM table ...` with joins, filters, order, page and lock.
    pub fn select_sql(&self, table: &str) -> Statement {
        let mut sql = format!("SELECT {table}.* FROM {table}");
        let mut params = Vec::new();
        self.write_joins(&mut sql);
        self.write_where(&mut sql, &mut params);
        self.write_order(&mut sql);
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        if let Some(offset) = self.offset.filter(|o| *o > 0) {
            let _ = write!(sql, " OFFSET {offset}");
        }
        if let Some(lock) = self.lock {
            sql.push(' ');
            sql.push_str(lock.strength.sql());
            match lock.wait {
                Wait::Block => {}
                Wait::SkipLocked => sql.push_str(" SKIP LOCKED"),
                Wait::NoWait => sql.push_str(" NOWAIT"),
            }
        }
        Statement { sql, params }
    }

    /// `SELECT COUNT(*) FROM table ...`; order, page and lock are ignored.
    pub fn count_sql(&self, table: &str) -> Statement {
        let mut sql = format!("SELECT COUNT(*) FROM {table}");
        let mut params = Vec::new();
        self.write_joins(&mut sql);
        self.write_where(&mut sql, &mut params);
        Statement { sql, params }
    }

    /// `SELECT select FROM table ...`, grouped and ordered by `group_by`
    /// when given. Order, page and lock are ignored.
    pub fn aggregate_sql(&self, table: &str, select: &str, group_by: Option<&str>) -> Statement {
        let mut sql = format!("SELECT {select} FROM {table}");
        let mut params = Vec::new();
        self.write_joins(&mut sql);
        self.write_where(&mut sql, &mut params);
        if let Some(group) = group_by {
            let _ = write!(sql, " GROUP BY {group} ORDER BY {group}");
        }
        Statement { sql, params }
    }

    /// `DELETE FROM table WHERE ... RETURNING ...`.
    ///
    /// Fails with [`DbError::MissingWhereClause`] unless a filter or
    /// [`all_rows`] was applied.
    pub fn delete_sql(&self, table: &str) -> DbResult<Statement> {
        self.require_filter("DELETE")?;
        let mut sql = format!("DELETE FROM {table}");
        let mut params = Vec::new();
        self.write_where(&mut sql, &mut params);
        self.write_returning(&mut sql);
        Ok(Statement { sql, params })
    }

    /// `UPDATE table SET col = $1, ... WHERE ... RETURNING ...`.
    ///
    /// Needs at least one assignment, and a filter or [`all_rows`].
    pub fn update_sql(&self, table: &str, assignments: &[(&'static str, Param)]) -> DbResult<Statement> {
        if assignments.is_empty() {
            return Err(DbError::NoColumns("UPDATE"));
        }
        self.require_filter("UPDATE")?;
        let mut sql = format!("UPDATE {table} SET ");
        let mut params = Vec::with_capacity(assignments.len());
        for (i, (column, value)) in assignments.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            params.push(value.clone());
            let _ = write!(sql, "{column} = ${}", params.len());
        }
        self.write_where(&mut sql, &mut params);
        self.write_returning(&mut sql);
        Ok(Statement { sql, params })
    }

    /// `INSERT INTO table (cols) VALUES ($1, ...) RETURNING ...`.
    pub fn insert_sql(&self, table: &str, values: &[(&'static str, Param)]) -> DbResult<Statement> {
        if values.is_empty() {
            return Err(DbError::NoColumns("INSERT"));
        }
        let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
        let placeholders: Vec<String> = (1..=values.len()).map(|n| format!("${n}")).collect();
        let mut sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let params = values.iter().map(|(_, v)| v.clone()).collect();
        self.write_returning(&mut sql);
        Ok(Statement { sql, params })
    }

    fn require_filter(&self, statement: &'static str) -> DbResult<()> {
        if self.conditions.is_empty() && !self.all_rows {
            return Err(DbError::MissingWhereClause(statement));
        }
        Ok(())
    }

    fn write_joins(&self, sql: &mut String) {
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
    }

    fn write_where(&self, sql: &mut String, params: &mut Vec<Param>) {
        for (i, condition) in self.conditions.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            let mut values = condition.params.iter();
            for ch in condition.template.chars() {
                if ch == '?' {
                    if let Some(value) = values.next() {
                        params.push(value.clone());
                        let _ = write!(sql, "${}", params.len());
                        continue;
                    }
                }
                sql.push(ch);
            }
        }
    }

    fn write_order(&self, sql: &mut String) {
        for (i, term) in self.order.iter().enumerate() {
            sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            sql.push_str(term.column);
            if term.descending {
                sql.push_str(" DESC");
            }
        }
    }

    fn write_returning(&self, sql: &mut String) {
        if !self.returning.is_empty() {
            sql.push_str(" RETURNING ");
            sql.push_str(&self.returning.join(", "));
        }
    }
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Lock selected rows, waiting for conflicting locks.
pub fn lock(strength: Locking) -> QueryOption {
    lock_with(strength, Wait::Block)
}

pub fn lock_with(strength: Locking, wait: Wait) -> QueryOption {
    Box::new(move |q| q.locked(strength, wait))
}

/// Select one page. Out-of-range input is clamped, see [`Pagination::new`].
pub fn paginate(page: i64, page_size: i64) -> QueryOption {
    let pagination = Pagination::new(page, page_size);
    Box::new(move |q| q.paginated(pagination))
}

pub fn limit(n: i64) -> QueryOption {
    Box::new(move |q| q.limited(n))
}

/// Order by tokens like `name` or `-createdAt` (descending).
///
/// Every token must resolve through `fields`; an unknown or empty token
/// fails with [`DbError::UnknownSortField`].
pub fn order_by<I, S>(tokens: I, fields: &FieldMap) -> DbResult<QueryOption>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let terms = tokens
        .into_iter()
        .map(|token| {
            let token = token.as_ref().trim();
            let (name, descending) = match token.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (token, false),
            };
            let column = fields.column(name)?;
            Ok(OrderTerm { column, descending })
        })
        .collect::<DbResult<Vec<_>>>()?;
    Ok(Box::new(move |q| q.ordered(terms)))
}

/// Append `RETURNING` to insert, update and delete statements.
pub fn returning(columns: &[&'static str]) -> QueryOption {
    let columns = columns.to_vec();
    Box::new(move |q| q.returning_columns(&columns))
}

/// Record associations to eager-load. Emits no SQL.
pub fn preload<S: AsRef<str>>(associations: &[S]) -> QueryOption {
    let associations: Vec<String> = associations.iter().map(|a| a.as_ref().to_string()).collect();
    Box::new(move |q| associations.into_iter().fold(q, |q, a| q.preloading(a)))
}

/// Add static join clauses, e.g. `"JOIN users ON users.id = orders.user_id"`.
pub fn joins(clauses: &[&'static str]) -> QueryOption {
    let clauses = clauses.to_vec();
    Box::new(move |q| clauses.into_iter().fold(q, Query::joined))
}

/// Opt in to DELETE or UPDATE touching every row of the table.
pub fn all_rows() -> QueryOption {
    Box::new(Query::unfiltered)
}

/// Wrap an arbitrary transformation.
pub fn scope<F>(f: F) -> QueryOption
where
    F: FnOnce(Query) -> Query + Send + 'static,
{
    Box::new(f)
}

// ============================================================================
// FILTER SCOPES
// ============================================================================

fn compare<T>(column: &'static str, op: &str, value: T) -> QueryOption
where
    T: ToSql + Send + Sync + 'static,
{
    let template = format!("{column} {op} ?");
    let value: Param = std::sync::Arc::new(value);
    Box::new(move |q| q.push_condition(template, vec![value]))
}

pub fn eq<T: ToSql + Send + Sync + 'static>(column: &'static str, value: T) -> QueryOption {
    compare(column, "=", value)
}

pub fn ne<T: ToSql + Send + Sync + 'static>(column: &'static str, value: T) -> QueryOption {
    compare(column, "<>", value)
}

pub fn gt<T: ToSql + Send + Sync + 'static>(column: &'static str, value: T) -> QueryOption {
    compare(column, ">", value)
}

pub fn gte<T: ToSql + Send + Sync + 'static>(column: &'static str, value: T) -> QueryOption {
    compare(column, ">=", value)
}

pub fn lt<T: ToSql + Send + Sync + 'static>(column: &'static str, value: T) -> QueryOption {
    compare(column, "<", value)
}

pub fn lte<T: ToSql + Send + Sync + 'static>(column: &'static str, value: T) -> QueryOption {
    compare(column, "<=", value)
}

/// `column = ANY($n)` with the whole list bound as one array parameter.
pub fn in_list<T>(column: &'static str, values: Vec<T>) -> QueryOption
where
    Vec<T>: ToSql + Send + Sync + 'static,
{
    compare_any(column, "= ANY(?)", values)
}

/// `column <> ALL($n)`.
pub fn not_in<T>(column: &'static str, values: Vec<T>) -> QueryOption
where
    Vec<T>: ToSql + Send + Sync + 'static,
{
    compare_any(column, "<> ALL(?)", values)
}

fn compare_any<T>(column: &'static str, op: &str, values: Vec<T>) -> QueryOption
where
    Vec<T>: ToSql + Send + Sync + 'static,
{
    let template = format!("{column} {op}");
    let values: Param = std::sync::Arc::new(values);
    Box::new(move |q| q.push_condition(template, vec![values]))
}

/// `column IS NULL`, or `IS NOT NULL` when `null` is false.
pub fn is_null(column: &'static str, null: bool) -> QueryOption {
    let template = if null {
        format!("{column} IS NULL")
    } else {
        format!("{column} IS NOT NULL")
    };
    Box::new(move |q| q.push_condition(template, Vec::new()))
}

/// Inclusive range.
pub fn between<T: ToSql + Send + Sync + 'static>(column: &'static str, from: T, to: T) -> QueryOption {
    let template = format!("{column} BETWEEN ? AND ?");
    let params: Vec<Param> = vec![std::sync::Arc::new(from), std::sync::Arc::new(to)];
    Box::new(move |q| q.push_condition(template, params))
}

/// Inclusive time range with optional ends. With neither end set, a no-op.
pub fn time_range(
    column: &'static str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> QueryOption {
    match (from, to) {
        (Some(from), Some(to)) => between(column, from, to),
        (Some(from), None) => gte(column, from),
        (None, Some(to)) => lte(column, to),
        (None, None) => Box::new(|q| q),
    }
}

/// Trim, collapse inner whitespace and enforce [`MAX_SEARCH_TERM_LEN`].
pub fn normalize_search_term(term: &str) -> DbResult<String> {
    let normalized = term.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() > MAX_SEARCH_TERM_LEN {
        return Err(DbError::SearchTermTooLong {
            max: MAX_SEARCH_TERM_LEN,
        });
    }
    Ok(normalized)
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Case-insensitive substring match over `columns`, joined by OR.
///
/// An empty term or empty column list adds nothing.
pub fn search(term: &str, columns: &[&'static str]) -> DbResult<QueryOption> {
    let term = normalize_search_term(term)?;
    if term.is_empty() || columns.is_empty() {
        return Ok(Box::new(|q| q));
    }

    let pattern: Param = std::sync::Arc::new(format!("%{}%", escape_like(&term)));
    let template = format!(
        "({})",
        columns
            .iter()
            .map(|c| format!("{c} ILIKE ?"))
            .collect::<Vec<_>>()
            .join(" OR ")
    );
    let params = vec![pattern; columns.len()];
    Ok(Box::new(move |q| q.push_condition(template, params)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use std::sync::Arc;

    const ORDER_FIELDS: FieldMap = FieldMap::new(&[
        Field::new("name", "name"),
        Field::new("createdAt", "created_at"),
    ]);

    fn build(options: Vec<QueryOption>) -> Query {
        Query::new().apply(options)
    }

    #[test]
    fn test_pagination_clamps() {
        let q = build(vec![paginate(0, 0)]);
        assert_eq!((q.offset(), q.limit()), (Some(0), Some(30)));

        let q = build(vec![paginate(3, 500)]);
        assert_eq!((q.offset(), q.limit()), (Some(200), Some(100)));

        let q = build(vec![paginate(-4, -1)]);
        assert_eq!((q.offset(), q.limit()), (Some(0), Some(30)));
    }

    #[test]
    fn test_order_by_resolves_and_rejects() {
        let q = build(vec![order_by(["-createdAt", "name"], &ORDER_FIELDS).unwrap()]);
        assert_eq!(
            q.order(),
            &[
                OrderTerm { column: "created_at", descending: true },
                OrderTerm { column: "name", descending: false },
            ]
        );

        assert!(matches!(
            order_by(["password"], &ORDER_FIELDS),
            Err(DbError::UnknownSortField(f)) if f == "password"
        ));
        assert!(matches!(order_by(["-"], &ORDER_FIELDS), Err(DbError::UnknownSortField(_))));
        assert!(matches!(order_by([""], &ORDER_FIELDS), Err(DbError::UnknownSortField(_))));
    }

    #[test]
    fn test_select_renders_every_clause() {
        let q = build(vec![
            joins(&["JOIN users ON users.id = orders.user_id"]),
            eq("orders.status", "open".to_string()),
            gt("orders.total", 10i64),
            order_by(["-createdAt"], &ORDER_FIELDS).unwrap(),
            paginate(2, 10),
            lock_with(Locking::Update, Wait::SkipLocked),
        ]);
        let stmt = q.select_sql("orders");
        assert_eq!(
            stmt.sql,
            "SELECT orders.* FROM orders JOIN users ON users.id = orders.user_id \
             WHERE orders.status = $1 AND orders.total > $2 \
             ORDER BY created_at DESC LIMIT 10 OFFSET 10 FOR UPDATE SKIP LOCKED"
        );
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_lock_variants() {
        let sql = build(vec![lock(Locking::Share)]).select_sql("t").sql;
        assert_eq!(sql, "SELECT t.* FROM t FOR SHARE");
        let sql = build(vec![lock_with(Locking::NoKeyUpdate, Wait::NoWait)]).select_sql("t").sql;
        assert_eq!(sql, "SELECT t.* FROM t FOR NO KEY UPDATE NOWAIT");
    }

    #[test]
    fn test_update_numbers_after_assignments() {
        let q = build(vec![eq("id", 7i64), returning(&["id", "name"])]);
        let stmt = q
            .update_sql("items", &[("name", Arc::new("x".to_string()) as Param)])
            .unwrap();
        assert_eq!(stmt.sql, "UPDATE items SET name = $1 WHERE id = $2 RETURNING id, name");
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_delete_and_count() {
        let q = build(vec![in_list("id", vec![1i64, 2, 3]), returning(&["id"])]);
        assert_eq!(
            q.delete_sql("items").unwrap().sql,
            "DELETE FROM items WHERE id = ANY($1) RETURNING id"
        );
        assert_eq!(q.count_sql("items").sql, "SELECT COUNT(*) FROM items WHERE id = ANY($1)");
    }

    #[test]
    fn test_unfiltered_writes_need_opt_in() {
        let name = || Arc::new("x".to_string()) as Param;

        let q = Query::new();
        assert!(matches!(q.delete_sql("items"), Err(DbError::MissingWhereClause("DELETE"))));
        assert!(matches!(
            q.update_sql("items", &[("name", name())]),
            Err(DbError::MissingWhereClause("UPDATE"))
        ));

        let q = build(vec![all_rows()]);
        assert_eq!(q.delete_sql("items").unwrap().sql, "DELETE FROM items");
        assert_eq!(
            q.update_sql("items", &[("name", name())]).unwrap().sql,
            "UPDATE items SET name = $1"
        );
    }

    #[test]
    fn test_aggregate_ignores_page_and_lock() {
        let q = build(vec![eq("status", "paid".to_string()), paginate(2, 10), lock(Locking::Update)]);
        assert_eq!(
            q.aggregate_sql("orders", "COUNT(*)", None).sql,
            "SELECT COUNT(*) FROM orders WHERE status = $1"
        );
        assert_eq!(
            q.aggregate_sql("orders", "region AS key, COUNT(*) AS value", Some("region")).sql,
            "SELECT region AS key, COUNT(*) AS value FROM orders WHERE status = $1 \
             GROUP BY region ORDER BY region"
        );
    }

    #[test]
    fn test_empty_column_lists_are_rejected() {
        let q = build(vec![eq("id", 1i64)]);
        assert!(matches!(q.update_sql("items", &[]), Err(DbError::NoColumns("UPDATE"))));
        assert!(matches!(q.insert_sql("items", &[]), Err(DbError::NoColumns("INSERT"))));
    }

    #[test]
    fn test_insert() {
        let q = build(vec![returning(&["*"])]);
        let stmt = q
            .insert_sql(
                "items",
                &[
                    ("name", Arc::new("a".to_string()) as Param),
                    ("qty", Arc::new(2i32) as Param),
                ],
            )
            .unwrap();
        assert_eq!(stmt.sql, "INSERT INTO items (name, qty) VALUES ($1, $2) RETURNING *");
        assert_eq!(stmt.param_refs().len(), 2);
    }

    #[test]
    fn test_null_and_range_scopes() {
        let now = Utc::now();
        let q = build(vec![
            is_null("deleted_at", true),
            is_null("archived_at", false),
            not_in("kind", vec!["a".to_string()]),
            time_range("created_at", Some(now), None),
            time_range("updated_at", None, None),
            between("qty", 1i32, 5i32),
        ]);
        assert_eq!(
            q.select_sql("t").sql,
            "SELECT t.* FROM t WHERE deleted_at IS NULL AND archived_at IS NOT NULL \
             AND kind <> ALL($1) AND created_at >= $2 AND qty BETWEEN $3 AND $4"
        );
    }

    #[test]
    fn test_search_normalizes_and_escapes() {
        let q = build(vec![search("  50%   off_ ", &["name", "sku"]).unwrap()]);
        let stmt = q.select_sql("products");
        assert_eq!(
            stmt.sql,
            "SELECT products.* FROM products WHERE (name ILIKE $1 OR sku ILIKE $2)"
        );
        assert_eq!(format!("{:?}", stmt.params[0]), format!("{:?}", "%50\\% off\\_%"));
    }

    #[test]
    fn test_search_empty_is_noop_and_long_is_rejected() {
        let q = build(vec![search("   ", &["name"]).unwrap()]);
        assert!(q.conditions().is_empty());

        let long = "x".repeat(MAX_SEARCH_TERM_LEN + 1);
        assert!(matches!(
            search(&long, &["name"]),
            Err(DbError::SearchTermTooLong { max: MAX_SEARCH_TERM_LEN })
        ));
        assert!(search(&"x".repeat(MAX_SEARCH_TERM_LEN), &["name"]).is_ok());
    }

    #[test]
    fn test_preload_and_scope() {
        let q = build(vec![
            preload(&["customer", "items"]),
            scope(|q| q.filter("tenant_id = ?", vec![Arc::new(5i64) as Param])),
        ]);
        assert_eq!(q.preloads(), &["customer".to_string(), "items".to_string()]);
        assert_eq!(q.select_sql("o").sql, "SELECT o.* FROM o WHERE tenant_id = $1");
    }
}

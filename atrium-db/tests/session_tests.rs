//! Connection manager, sessions and repositories against a scripted connector.

use atrium_db::query::{self, Locking};
use atrium_db::{
    column, param, Database, DbConfig, DbError, DbResult, Field, FieldMap, Granularity,
    ListRequest, Model, Repository, Row, Schema, DEFAULT_ORDER,
};
use atrium_test_utils::{connection_lost, MockConnector};
use std::time::Duration;

static ITEMS: Schema = Schema {
    table: "items",
    ddl: "CREATE TABLE IF NOT EXISTS items (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL, created_at TIMESTAMPTZ NOT NULL DEFAULT now())",
    fields: FieldMap::new(&[
        Field::new("id", "id"),
        Field::new("name", "name"),
        Field::new("createdAt", "created_at"),
    ]),
};

static TAGS: Schema = Schema {
    table: "tags",
    ddl: "CREATE TABLE IF NOT EXISTS tags (id BIGSERIAL PRIMARY KEY, label TEXT NOT NULL)",
    fields: FieldMap::new(&[Field::new("id", "id"), Field::new("label", "label")]),
};

#[derive(Debug)]
struct Item {
    #[allow(dead_code)]
    id: i64,
    #[allow(dead_code)]
    name: String,
}

impl Model for Item {
    fn schema() -> &'static Schema {
        &ITEMS
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: column(row, "id")?,
            name: column(row, "name")?,
        })
    }
}

fn quick_config(attempts: u32) -> DbConfig {
    DbConfig {
        connect_attempts: attempts,
        connect_backoff: Duration::ZERO,
        ..DbConfig::default()
    }
}

// ============================================================================
// CONNECTION MANAGER
// ============================================================================

#[tokio::test]
async fn test_connect_retries_until_reachable() {
    let mock = MockConnector::new();
    mock.fail_acquire(connection_lost()).fail_acquire(connection_lost());

    let db = Database::connect_with(mock.clone(), &quick_config(3)).await.unwrap();

    assert_eq!(mock.count_of("SELECT 1"), 1);
    assert_eq!(mock.count_of("CREATE EXTENSION IF NOT EXISTS pg_trgm"), 1);
    assert_eq!(db.pool_status().max_size, 16);
}

#[tokio::test]
async fn test_connect_gives_up_after_attempts() {
    let mock = MockConnector::new();
    mock.fail_acquire(connection_lost()).fail_acquire(connection_lost());

    let err = Database::connect_with(mock.clone(), &quick_config(2)).await.unwrap_err();

    assert!(matches!(err, DbError::ConnectionLost(_)));
    assert_eq!(mock.acquired(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_backoff_is_linear() {
    let mock = MockConnector::new();
    mock.fail_acquire(connection_lost()).fail_acquire(connection_lost());
    let config = DbConfig {
        connect_attempts: 5,
        connect_backoff: Duration::from_secs(1),
        ..DbConfig::default()
    };
    let started = tokio::time::Instant::now();

    Database::connect_with(mock, &config).await.unwrap();

    // 1s after the first failure, 2s after the second.
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test]
async fn test_extension_failure_is_tolerated_and_bad_names_skipped() {
    let mock = MockConnector::new();
    mock.fail_on(
        "CREATE EXTENSION",
        DbError::from_sql_state("42501", "permission denied to create extension"),
    );
    let config = DbConfig {
        extensions: vec!["pg_trgm".into(), "uuid_ossp".into(), "evil; DROP TABLE x".into()],
        ..quick_config(1)
    };

    Database::connect_with(mock.clone(), &config).await.unwrap();

    assert_eq!(mock.count_of("CREATE EXTENSION"), 2);
    assert!(mock.statements().iter().all(|s| !s.contains("DROP")));
}

#[tokio::test]
async fn test_auto_migrate_runs_ddl_in_order() {
    let mock = MockConnector::new();
    let db = Database::from_connector(mock.clone());

    db.auto_migrate(&[&ITEMS, &TAGS]).await.unwrap();

    assert_eq!(mock.statements(), vec![ITEMS.ddl, TAGS.ddl]);
    assert_eq!(mock.acquired(), 1);
}

#[tokio::test]
async fn test_closed_pool_refuses_sessions() {
    let mock = MockConnector::new();
    let db = Database::from_connector(mock);
    db.close();

    let err = db.conn(None, vec![]).await.unwrap_err();
    assert!(matches!(err, DbError::PoolClosed));
    assert!(db.health_check().await.is_err());
}

// ============================================================================
// SESSIONS
// ============================================================================

#[tokio::test]
async fn test_autonomous_session_renders_options() {
    let mock = MockConnector::new();
    let db = Database::from_connector(mock.clone());

    let session = db
        .conn(None, vec![query::eq("name", "widget".to_string()), query::lock(Locking::Update)])
        .await
        .unwrap();
    assert!(!session.in_transaction());
    session.select("items").await.unwrap();

    let session = session.with(vec![query::paginate(2, 20)]);
    session.select("items").await.unwrap();

    assert_eq!(
        mock.statements(),
        vec![
            "SELECT items.* FROM items WHERE name = $1 FOR UPDATE",
            "SELECT items.* FROM items WHERE name = $1 LIMIT 20 OFFSET 20 FOR UPDATE",
        ]
    );
}

#[tokio::test]
async fn test_count_without_rows_is_zero() {
    let mock = MockConnector::new();
    let db = Database::from_connector(mock.clone());
    let session = db.conn(None, vec![query::is_null("deleted_at", true)]).await.unwrap();

    assert_eq!(session.count("items").await.unwrap(), 0);
    assert_eq!(
        mock.statements(),
        vec!["SELECT COUNT(*) FROM items WHERE deleted_at IS NULL"]
    );
}

#[tokio::test]
async fn test_write_without_returning_uses_execute() {
    let mock = MockConnector::new();
    let db = Database::from_connector(mock.clone());
    let session = db.conn(None, vec![query::eq("id", 3i64)]).await.unwrap();

    let written = session
        .update("items", &[("name", param("renamed".to_string()))])
        .await
        .unwrap();

    assert_eq!(written.affected, 0);
    assert!(written.returned.is_empty());
    assert_eq!(mock.statements(), vec!["UPDATE items SET name = $1 WHERE id = $2"]);
}

// ============================================================================
// REPOSITORY
// ============================================================================

#[tokio::test]
async fn test_find_one_without_rows_is_not_found() {
    let mock = MockConnector::new();
    let repo: Repository<Item> = Repository::new(Database::from_connector(mock.clone()));

    let err = repo.find_one(None, vec![query::eq("id", 1i64)]).await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(mock.statements(), vec!["SELECT items.* FROM items WHERE id = $1 LIMIT 1"]);
}

#[tokio::test]
async fn test_list_request_drives_find_many() {
    let mock = MockConnector::new();
    let repo: Repository<Item> = Repository::new(Database::from_connector(mock.clone()));
    let request = ListRequest::new(3, 10).with_search("blue  widget");

    let options = request.options(&ITEMS.fields, DEFAULT_ORDER, &["name"]).unwrap();
    let items = repo.find_many(None, options).await.unwrap();

    assert!(items.is_empty());
    assert_eq!(
        mock.statements(),
        vec!["SELECT items.* FROM items WHERE (name ILIKE $1) ORDER BY created_at DESC LIMIT 10 OFFSET 20"]
    );
}

#[tokio::test]
async fn test_insert_and_delete_statements() {
    let mock = MockConnector::new();
    let repo: Repository<Item> = Repository::new(Database::from_connector(mock.clone()));

    let err = repo
        .insert(None, &[("name", param("gadget".to_string()))])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Other(_)));

    let removed = repo
        .delete_many(None, vec![query::lt("id", 100i64)])
        .await
        .unwrap();
    assert_eq!(removed, 0);

    assert_eq!(
        mock.statements(),
        vec![
            "INSERT INTO items (name) VALUES ($1) RETURNING *",
            "DELETE FROM items WHERE id < $1",
        ]
    );
}

#[tokio::test]
async fn test_bulk_writes_without_filter_are_refused() {
    let mock = MockConnector::new();
    let repo: Repository<Item> = Repository::new(Database::from_connector(mock.clone()));

    let err = repo.delete_many(None, vec![]).await.unwrap_err();
    assert!(matches!(err, DbError::MissingWhereClause("DELETE")));

    let err = repo
        .update_many(None, &[("name", param("x".to_string()))], vec![query::paginate(1, 10)])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::MissingWhereClause("UPDATE")));

    let err = repo
        .update_many(None, &[], vec![query::eq("id", 1i64)])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NoColumns("UPDATE")));
    assert!(mock.statements().is_empty());

    repo.delete_many(None, vec![query::all_rows()]).await.unwrap();
    assert_eq!(mock.statements(), vec!["DELETE FROM items"]);
}

#[tokio::test]
async fn test_aggregates_render_grouped_sql() {
    let mock = MockConnector::new();
    let repo: Repository<Item> = Repository::new(Database::from_connector(mock.clone()));
    let id = ITEMS.fields.resolve("id").unwrap();
    let name = ITEMS.fields.resolve("name").unwrap();
    let created = ITEMS.fields.resolve("createdAt").unwrap();

    assert_eq!(repo.sum(None, id, vec![query::gt("id", 10i64)]).await.unwrap(), 0.0);
    assert!(repo.count_by(None, name, vec![]).await.unwrap().is_empty());
    assert!(repo.avg_by(None, name, id, vec![]).await.unwrap().is_empty());
    let series = repo
        .time_series_count(None, created, Granularity::Daily, vec![query::paginate(1, 5)])
        .await
        .unwrap();
    assert!(series.is_empty());

    assert_eq!(
        mock.statements(),
        vec![
            "SELECT COALESCE(SUM(id), 0)::float8 FROM items WHERE id > $1",
            "SELECT name::text AS key, COUNT(*)::float8 AS value FROM items GROUP BY name ORDER BY name",
            "SELECT name::text AS key, COALESCE(AVG(id), 0)::float8 AS value FROM items \
             GROUP BY name ORDER BY name",
            "SELECT date_trunc('day', created_at) AS bucket, COUNT(*)::float8 AS value FROM items \
             GROUP BY bucket ORDER BY bucket",
        ]
    );
}

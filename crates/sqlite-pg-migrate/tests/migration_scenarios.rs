//! End-to-end migration scenarios against in-memory SQLite databases.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlite_pg_migrate::core::{MigrationLockGuard, TransactionHandle};
use sqlite_pg_migrate::drivers::SqliteHandle;
use sqlite_pg_migrate::{
    Config, DatabaseHandle, DialectKind, DifferenceKind, Orchestrator, Result, Row, SqlValue,
};
use tokio_util::sync::CancellationToken;

/// Statements a handle was asked to run, in order.
#[derive(Default, Clone)]
struct Log {
    executed: Arc<Mutex<Vec<String>>>,
    queried: Arc<Mutex<Vec<String>>>,
}

impl Log {
    fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    fn queried(&self) -> Vec<String> {
        self.queried.lock().clone()
    }

    fn clear(&self) {
        self.executed.lock().clear();
        self.queried.lock().clear();
    }
}

/// Passes everything through to `inner` and logs the SQL, including
/// statements run inside transactions.
struct Recording {
    inner: Arc<dyn DatabaseHandle>,
    log: Log,
}

struct RecordingTx {
    inner: Box<dyn TransactionHandle>,
    log: Log,
}

#[async_trait]
impl DatabaseHandle for Recording {
    fn dialect(&self) -> DialectKind {
        self.inner.dialect()
    }

    fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    fn enforces_foreign_keys(&self) -> bool {
        self.inner.enforces_foreign_keys()
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.log.queried.lock().push(sql.to_string());
        self.inner.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.log.executed.lock().push(sql.to_string());
        self.inner.execute(sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn TransactionHandle>> {
        Ok(Box::new(RecordingTx {
            inner: self.inner.begin().await?,
            log: self.log.clone(),
        }))
    }

    async fn try_acquire_migration_lock(
        &self,
        lock_name: &str,
    ) -> Result<Option<Box<dyn MigrationLockGuard>>> {
        self.inner.try_acquire_migration_lock(lock_name).await
    }
}

#[async_trait]
impl TransactionHandle for RecordingTx {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.log.queried.lock().push(sql.to_string());
        self.inner.query(sql, params).await
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.log.executed.lock().push(sql.to_string());
        self.inner.execute(sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

fn make_test_config(migration_yaml: &str) -> Config {
    let yaml = format!(
        "source:\n  dialect: sqlite\n  path: ':memory:'\ntarget:\n  dialect: sqlite\n  path: ':memory:'\n{}",
        migration_yaml
    );
    Config::from_yaml(&yaml).unwrap()
}

async fn make_users_source() -> Arc<dyn DatabaseHandle> {
    let db = SqliteHandle::memory().await.unwrap();
    db.execute(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT UNIQUE, age INTEGER)",
        &[],
    )
    .await
    .unwrap();
    db.execute(
        "INSERT INTO users (id, email, age) VALUES (1, 'ann@example.com', 34), (2, 'bo@example.com', NULL), (3, 'cy@example.com', 27)",
        &[],
    )
    .await
    .unwrap();
    Arc::new(db)
}

async fn make_items_source(rows: i64) -> Arc<dyn DatabaseHandle> {
    let db = SqliteHandle::memory().await.unwrap();
    db.execute("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL)", &[])
        .await
        .unwrap();
    for i in 1..=rows {
        db.execute(
            "INSERT INTO items (id, label) VALUES (?, ?)",
            &[SqlValue::I64(i), SqlValue::Text(format!("item-{:03}", i))],
        )
        .await
        .unwrap();
    }
    Arc::new(db)
}

async fn table_names(db: &dyn DatabaseHandle) -> Vec<String> {
    db.query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        &[],
    )
    .await
    .unwrap()
    .iter()
    .filter_map(|r| r.get_str("name"))
    .collect()
}

/// Row count, distinct keys and an order-independent fingerprint.
async fn items_fingerprint(db: &dyn DatabaseHandle) -> (i64, i64, i64, i64) {
    let rows = db
        .query(
            "SELECT COUNT(*) AS n, COUNT(DISTINCT id) AS d, SUM(id) AS s, SUM(length(label)) AS l FROM items",
            &[],
        )
        .await
        .unwrap();
    let r = &rows[0];
    (
        r.get_i64("n").unwrap_or(0),
        r.get_i64("d").unwrap_or(0),
        r.get_i64("s").unwrap_or(0),
        r.get_i64("l").unwrap_or(0),
    )
}

#[tokio::test]
async fn test_users_migration_into_empty_target() {
    let source = make_users_source().await;
    let target: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
    let orchestrator = Orchestrator::with_handles(make_test_config(""), source, target.clone());

    let result = orchestrator
        .run(CancellationToken::new(), false)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.tables_processed, 1);
    assert_eq!(result.rows_migrated, 3);
    assert!(result.failed_tables.is_empty());

    let rows = target
        .query("SELECT id, email, age FROM users ORDER BY id", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get_str("email").as_deref(), Some("ann@example.com"));
    assert_eq!(rows[1].get_i64("age"), None);
    assert_eq!(rows[2].get_i64("age"), Some(27));

    let comparison = orchestrator.compare().await.unwrap();
    assert!(comparison.compatible, "{:?}", comparison.differences);
    assert_eq!(comparison.of_kind(DifferenceKind::ColumnTypeChanged).count(), 0);
    assert_eq!(comparison.of_kind(DifferenceKind::TableAdded).count(), 0);
}

#[tokio::test]
async fn test_legacy_table_survives_without_drop_tables() {
    let source = make_users_source().await;
    let target: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
    target
        .execute("CREATE TABLE legacy (id INTEGER PRIMARY KEY, note TEXT)", &[])
        .await
        .unwrap();

    let orchestrator = Orchestrator::with_handles(make_test_config(""), source, target.clone());
    let result = orchestrator
        .run(CancellationToken::new(), false)
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.warnings.iter().any(|w| w.contains("'legacy'")));
    assert!(!result
        .summary
        .schema_changes
        .iter()
        .any(|c| c.contains("legacy")));
    assert!(table_names(target.as_ref()).await.contains(&"legacy".to_string()));
}

#[tokio::test]
async fn test_legacy_table_dropped_with_drop_tables() {
    let source = make_users_source().await;
    let target: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
    target
        .execute("CREATE TABLE legacy (id INTEGER PRIMARY KEY, note TEXT)", &[])
        .await
        .unwrap();

    let config = make_test_config("migration:\n  drop_tables: true\n");
    let orchestrator = Orchestrator::with_handles(config, source, target.clone());
    let result = orchestrator
        .run(CancellationToken::new(), false)
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.errors);
    assert!(result
        .summary
        .schema_changes
        .iter()
        .any(|c| c == "Drop table 'legacy'"));
    assert_eq!(result.summary.tables_dropped, 1);
    let names = table_names(target.as_ref()).await;
    assert!(!names.contains(&"legacy".to_string()));
    assert!(names.contains(&"users".to_string()));
}

#[tokio::test]
async fn test_batch_completeness() {
    let source_log = Log::default();
    let target_log = Log::default();
    let source_db = make_items_source(25).await;
    let source: Arc<dyn DatabaseHandle> = Arc::new(Recording {
        inner: source_db.clone(),
        log: source_log.clone(),
    });
    let target_db: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
    let target: Arc<dyn DatabaseHandle> = Arc::new(Recording {
        inner: target_db.clone(),
        log: target_log.clone(),
    });

    let config = make_test_config("migration:\n  batch_size: 10\n");
    let orchestrator = Orchestrator::with_handles(config, source, target);

    // Discovery also queries the source; only count the copy's reads.
    let plan = orchestrator.plan(false).await.unwrap();
    assert_eq!(plan.copy_tasks().count(), 1);
    source_log.clear();

    let result = orchestrator
        .run(CancellationToken::new(), false)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.rows_migrated, 25);

    let reads = source_log
        .queried()
        .into_iter()
        .filter(|q| q.contains("FROM \"items\"") && q.contains("LIMIT"))
        .count();
    assert_eq!(reads, 3);

    let inserts = target_log
        .executed()
        .into_iter()
        .filter(|s| s.starts_with("INSERT INTO \"items\""))
        .count();
    assert_eq!(inserts, 3);

    assert_eq!(
        items_fingerprint(target_db.as_ref()).await,
        items_fingerprint(source_db.as_ref()).await
    );
    assert_eq!(items_fingerprint(target_db.as_ref()).await.0, 25);
}

#[tokio::test]
async fn test_batch_size_dividing_row_count() {
    let source = make_items_source(20).await;
    let target_db: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
    let target_log = Log::default();
    let target: Arc<dyn DatabaseHandle> = Arc::new(Recording {
        inner: target_db.clone(),
        log: target_log.clone(),
    });

    let config = make_test_config("migration:\n  batch_size: 5\n");
    let orchestrator = Orchestrator::with_handles(config, source.clone(), target);
    let result = orchestrator
        .run(CancellationToken::new(), false)
        .await
        .unwrap();

    assert_eq!(result.rows_migrated, 20);
    let inserts = target_log
        .executed()
        .iter()
        .filter(|s| s.starts_with("INSERT INTO \"items\""))
        .count();
    assert_eq!(inserts, 4);
    assert_eq!(
        items_fingerprint(target_db.as_ref()).await,
        items_fingerprint(source.as_ref()).await
    );
}

#[tokio::test]
async fn test_dry_run_emits_exactly_what_run_executes() {
    let source = make_items_source(12).await;
    let target_log = Log::default();
    let target_db: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
    let target: Arc<dyn DatabaseHandle> = Arc::new(Recording {
        inner: target_db.clone(),
        log: target_log.clone(),
    });

    let config = make_test_config("migration:\n  batch_size: 5\n");
    let orchestrator = Orchestrator::with_handles(config, source, target);

    let dry = orchestrator
        .run(CancellationToken::new(), true)
        .await
        .unwrap();
    assert!(dry.dry_run);
    assert!(!dry.statements.is_empty());
    assert!(target_log.executed().is_empty());
    assert!(table_names(target_db.as_ref()).await.is_empty());

    let live = orchestrator
        .run(CancellationToken::new(), false)
        .await
        .unwrap();
    assert!(live.success, "{:?}", live.errors);
    assert_eq!(target_log.executed(), dry.statements);
    assert_eq!(live.rows_migrated, 12);
}

/// A file target with `PRAGMA foreign_keys = ON`.
async fn make_enforcing_target(dir: &tempfile::TempDir) -> Arc<dyn DatabaseHandle> {
    let path = dir.path().join("target.db");
    let db = SqliteHandle::open(path.to_str().unwrap(), true, 2).await.unwrap();
    assert!(db.enforces_foreign_keys());
    Arc::new(db)
}

#[tokio::test]
async fn test_self_referencing_rows_load_across_batches() {
    let source = SqliteHandle::memory().await.unwrap();
    source
        .execute(
            "CREATE TABLE node (id INTEGER PRIMARY KEY, parent INTEGER REFERENCES node(id))",
            &[],
        )
        .await
        .unwrap();
    // Row 1 points at row 5, which lands in the last batch.
    source
        .execute(
            "INSERT INTO node (id, parent) VALUES (1, 5), (2, NULL), (3, 1), (4, 2), (5, NULL)",
            &[],
        )
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let target = make_enforcing_target(&dir).await;
    let config = make_test_config("migration:\n  batch_size: 2\n");
    let orchestrator = Orchestrator::with_handles(config, Arc::new(source), target.clone());

    let result = orchestrator
        .run(CancellationToken::new(), false)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.rows_migrated, 5);

    let rows = target
        .query("SELECT id, parent FROM node ORDER BY id", &[])
        .await
        .unwrap();
    let pairs: Vec<(Option<i64>, Option<i64>)> =
        rows.iter().map(|r| (r.get_i64("id"), r.get_i64("parent"))).collect();
    assert_eq!(
        pairs,
        vec![
            (Some(1), Some(5)),
            (Some(2), None),
            (Some(3), Some(1)),
            (Some(4), Some(2)),
            (Some(5), None),
        ]
    );

    // The constraint is still in place after the load.
    let violation = target
        .execute("INSERT INTO node (id, parent) VALUES (6, 99)", &[])
        .await;
    assert!(violation.is_err());
}

#[tokio::test]
async fn test_cycle_into_enforcing_target() {
    let source = SqliteHandle::memory().await.unwrap();
    source
        .execute("CREATE TABLE a (id INTEGER PRIMARY KEY, b_id INTEGER REFERENCES b(id))", &[])
        .await
        .unwrap();
    source
        .execute("CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a(id))", &[])
        .await
        .unwrap();
    source
        .execute("INSERT INTO a (id, b_id) VALUES (1, 1)", &[])
        .await
        .unwrap();
    source
        .execute("INSERT INTO b (id, a_id) VALUES (1, 1)", &[])
        .await
        .unwrap();
    let source: Arc<dyn DatabaseHandle> = Arc::new(source);

    let dir = tempfile::tempdir().unwrap();
    let target = make_enforcing_target(&dir).await;

    let orchestrator = Orchestrator::with_handles(make_test_config(""), source.clone(), target.clone());
    let err = orchestrator.plan(false).await.unwrap_err();
    assert!(err.to_string().contains("reference cycle"), "{}", err);
    assert!(table_names(target.as_ref()).await.is_empty());

    let config = make_test_config("migration:\n  continue_on_error: true\n");
    let orchestrator = Orchestrator::with_handles(config, source, target.clone());
    let result = orchestrator
        .run(CancellationToken::new(), false)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.rows_migrated, 2);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.starts_with("skipped: ") && w.contains("reference cycle")));
}

#[tokio::test]
async fn test_discovery_warnings_reach_the_result() {
    let source = SqliteHandle::memory().await.unwrap();
    source
        .execute("CREATE TABLE shapes (id INTEGER PRIMARY KEY, geom GEOMETRY)", &[])
        .await
        .unwrap();
    let target: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
    let orchestrator = Orchestrator::with_handles(make_test_config(""), Arc::new(source), target);

    let model = orchestrator.discover_source().await.unwrap();
    assert!(model
        .warnings
        .iter()
        .any(|w| w.starts_with("shapes.geom") && w.contains("GEOMETRY")));

    let result = orchestrator
        .run(CancellationToken::new(), false)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert!(
        result
            .warnings
            .iter()
            .any(|w| w.starts_with("source: shapes.geom") && w.contains("GEOMETRY")),
        "{:?}",
        result.warnings
    );
}

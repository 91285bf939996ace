//! SQLite database handle backed by an sqlx pool.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column as _, Row as _, Sqlite, Transaction, TypeInfo, ValueRef};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::core::capability::DialectKind;
use crate::core::traits::{DatabaseHandle, MigrationLockGuard, TransactionHandle};
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// In-memory database marker accepted in `path`.
pub const MEMORY_PATH: &str = ":memory:";

/// SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteHandle {
    pool: SqlitePool,
    namespace: String,
    /// Database file; `None` for an in-memory database.
    path: Option<PathBuf>,
    /// Migration lock for in-memory databases, which have no file to lock.
    memory_lock: Arc<Mutex<()>>,
    /// `PRAGMA foreign_keys` on every pooled connection.
    foreign_keys: bool,
}

impl SqliteHandle {
    /// Open the database described by a connection config.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let path = config
            .path
            .as_deref()
            .ok_or_else(|| MigrateError::Config("sqlite connection requires a path".into()))?;
        let max_conns = config.max_connections.unwrap_or(4) as u32;
        Self::open(path, config.enforce_foreign_keys, max_conns).await
    }

    /// Open (creating if missing) a database file, or `:memory:`.
    pub async fn open(path: &str, enforce_foreign_keys: bool, max_conns: u32) -> Result<Self> {
        if path == MEMORY_PATH {
            return Self::memory().await;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(enforce_foreign_keys);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_conns.max(1))
            .connect_with(options)
            .await?;

        info!("Connected to SQLite database: {}", path);

        Ok(Self {
            pool,
            namespace: DialectKind::Sqlite.default_namespace().to_string(),
            path: Some(PathBuf::from(path)),
            memory_lock: Arc::new(Mutex::new(())),
            foreign_keys: enforce_foreign_keys,
        })
    }

    /// Open a private in-memory database.
    ///
    /// Every sqlx connection to `:memory:` is a separate database, so the pool
    /// is pinned to one connection that never expires.
    pub async fn memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            namespace: DialectKind::Sqlite.default_namespace().to_string(),
            path: None,
            memory_lock: Arc::new(Mutex::new(())),
            foreign_keys: false,
        })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn lock_path(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(".migrate-lock");
        PathBuf::from(name)
    }
}

#[async_trait]
impl DatabaseHandle for SqliteHandle {
    fn dialect(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn enforces_foreign_keys(&self) -> bool {
        self.foreign_keys
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        decode_rows(&rows)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn TransactionHandle>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn try_acquire_migration_lock(
        &self,
        lock_name: &str,
    ) -> Result<Option<Box<dyn MigrationLockGuard>>> {
        let Some(ref db_path) = self.path else {
            return Ok(self
                .memory_lock
                .clone()
                .try_lock_owned()
                .ok()
                .map(|guard| {
                    Box::new(MemoryLockGuard {
                        name: lock_name.to_string(),
                        _guard: guard,
                    }) as Box<dyn MigrationLockGuard>
                }));
        };

        let lock_path = Self::lock_path(db_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        // Fully qualified: std::fs::File has an inherent method of the same name.
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!("Acquired migration lock file {}", lock_path.display());
                Ok(Some(Box::new(FileLockGuard {
                    name: lock_name.to_string(),
                    file,
                })))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                debug!("Migration lock file {} is held", lock_path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Transaction on one pooled SQLite connection. sqlx rolls back on drop.
struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl TransactionHandle for SqliteTransaction {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut *self.tx)
            .await?;
        decode_rows(&rows)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Exclusive OS lock on `<db>.migrate-lock`. The OS releases it when the
/// process exits.
struct FileLockGuard {
    name: String,
    file: File,
}

#[async_trait]
impl MigrationLockGuard for FileLockGuard {
    fn lock_name(&self) -> &str {
        &self.name
    }

    async fn release(self: Box<Self>) -> Result<()> {
        FileExt::unlock(&self.file)?;
        Ok(())
    }
}

struct MemoryLockGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl MigrationLockGuard for MemoryLockGuard {
    fn lock_name(&self) -> &str {
        &self.name
    }

    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn bind_params<'q>(mut query: SqliteQuery<'q>, params: &[SqlValue]) -> SqliteQuery<'q> {
    for value in params {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::I64(v) => query.bind(*v),
            SqlValue::F64(v) => query.bind(*v),
            SqlValue::Decimal(v) => query.bind(v.to_string()),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Bytes(v) => query.bind(v.clone()),
            SqlValue::Uuid(v) => query.bind(v.to_string()),
            SqlValue::Date(v) => query.bind(*v),
            SqlValue::Time(v) => query.bind(*v),
            SqlValue::DateTime(v) => query.bind(*v),
            SqlValue::DateTimeTz(v) => query.bind(*v),
            SqlValue::Json(v) => query.bind(v.to_string()),
        };
    }
    query
}

/// Decode rows by the storage class of each value, not the declared type:
/// SQLite columns may hold any type.
fn decode_rows(rows: &[SqliteRow]) -> Result<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>()
        .into();

    rows.iter()
        .map(|row| {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                let raw = row.try_get_raw(idx)?;
                if raw.is_null() {
                    values.push(SqlValue::Null);
                    continue;
                }
                let storage = raw.type_info().name().to_string();
                let value = match storage.as_str() {
                    "INTEGER" => SqlValue::I64(row.try_get_unchecked::<i64, _>(idx)?),
                    "REAL" => SqlValue::F64(row.try_get_unchecked::<f64, _>(idx)?),
                    "BLOB" => SqlValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
                    _ => SqlValue::Text(row.try_get_unchecked::<String, _>(idx)?),
                };
                values.push(value);
            }
            Ok(Row::new(columns.clone(), values))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_decodes_storage_classes() {
        let db = SqliteHandle::memory().await.unwrap();
        db.execute("CREATE TABLE t (a INTEGER, b TEXT, c REAL, d BLOB, e BOOLEAN)", &[])
            .await
            .unwrap();
        db.execute(
            "INSERT INTO t VALUES (?, ?, ?, ?, ?)",
            &[
                SqlValue::I64(1),
                SqlValue::Text("x".into()),
                SqlValue::F64(2.5),
                SqlValue::Bytes(vec![0, 1]),
                SqlValue::Null,
            ],
        )
        .await
        .unwrap();

        let rows = db.query("SELECT * FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].values(),
            &[
                SqlValue::I64(1),
                SqlValue::Text("x".into()),
                SqlValue::F64(2.5),
                SqlValue::Bytes(vec![0, 1]),
                SqlValue::Null,
            ]
        );
    }

    #[tokio::test]
    async fn test_transaction_rollback_on_drop() {
        let db = SqliteHandle::memory().await.unwrap();
        db.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        {
            let mut tx = db.begin().await.unwrap();
            tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        }
        let rows = db.query("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].get_i64("n"), Some(0));
    }

    #[tokio::test]
    async fn test_memory_lock_is_exclusive() {
        let db = SqliteHandle::memory().await.unwrap();
        let guard = db.try_acquire_migration_lock("m").await.unwrap().unwrap();
        assert!(db.try_acquire_migration_lock("m").await.unwrap().is_none());
        guard.release().await.unwrap();
        assert!(db.try_acquire_migration_lock("m").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let path = path.to_str().unwrap();
        let a = SqliteHandle::open(path, false, 2).await.unwrap();
        let b = SqliteHandle::open(path, false, 2).await.unwrap();

        let guard = a.try_acquire_migration_lock("m").await.unwrap().unwrap();
        assert!(b.try_acquire_migration_lock("m").await.unwrap().is_none());
        guard.release().await.unwrap();
        assert!(b.try_acquire_migration_lock("m").await.unwrap().is_some());
    }
}

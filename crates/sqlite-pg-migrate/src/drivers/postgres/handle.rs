//! PostgreSQL database handle backed by a deadpool-postgres pool.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use super::tls::SslMode;
use super::types::decode_rows;
use crate::config::ConnectionConfig;
use crate::core::capability::DialectKind;
use crate::core::traits::{DatabaseHandle, MigrationLockGuard, TransactionHandle};
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

const DEFAULT_MAX_CONNECTIONS: usize = 8;
const APPLICATION_NAME: &str = "sqlite-pg-migrate";

/// PostgreSQL connection pool scoped to one schema.
#[derive(Clone)]
pub struct PostgresHandle {
    pool: Pool,
    namespace: String,
}

impl PostgresHandle {
    /// Create the pool and verify that a connection can be opened.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name(APPLICATION_NAME);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let max_conns = config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let mgr = match SslMode::parse(&config.ssl_mode)?.connector()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };
        let pool = Pool::builder(mgr)
            .max_size(max_conns)
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))?;

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{} (schema {})",
            config.host,
            config.port,
            config.database,
            config.namespace()
        );

        Ok(Self {
            pool,
            namespace: config.namespace().to_string(),
        })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context))
    }

    fn quote(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

impl std::fmt::Debug for PostgresHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresHandle")
            .field("namespace", &self.namespace)
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

fn as_params(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl DatabaseHandle for PostgresHandle {
    fn dialect(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let client = self.client("getting connection for query").await?;
        let rows = client.query(sql, &as_params(params)).await?;
        decode_rows(&rows)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let client = self.client("getting connection for execute").await?;
        Ok(client.execute(sql, &as_params(params)).await?)
    }

    async fn begin(&self) -> Result<Box<dyn TransactionHandle>> {
        let client = self.client("getting connection for transaction").await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PostgresTransaction {
            client: Some(client),
        }))
    }

    /// Lock by holding `SELECT ... FOR UPDATE NOWAIT` on the single row of the
    /// lock table inside an open transaction. The server drops the row lock
    /// when the transaction ends or the connection dies.
    async fn try_acquire_migration_lock(
        &self,
        lock_name: &str,
    ) -> Result<Option<Box<dyn MigrationLockGuard>>> {
        let table = format!("{}.{}", Self::quote(&self.namespace), Self::quote(lock_name));
        let client = self.client("getting connection for migration lock").await?;

        client
            .batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {schema};
                 CREATE TABLE IF NOT EXISTS {table} (
                     id integer PRIMARY KEY CHECK (id = 1),
                     locked_at timestamptz,
                     locked_by text
                 );
                 INSERT INTO {table} (id) VALUES (1) ON CONFLICT (id) DO NOTHING;",
                schema = Self::quote(&self.namespace),
                table = table
            ))
            .await?;

        client.batch_execute("BEGIN").await?;
        let select = format!("SELECT id FROM {} WHERE id = 1 FOR UPDATE NOWAIT", table);
        match client.query(&select, &[]).await {
            Ok(_) => {}
            Err(e) if e.code() == Some(&SqlState::LOCK_NOT_AVAILABLE) => {
                if let Err(e) = client.batch_execute("ROLLBACK").await {
                    drop(Object::take(client));
                    return Err(e.into());
                }
                debug!("Migration lock {} is held by another session", table);
                return Ok(None);
            }
            Err(e) => {
                drop(Object::take(client));
                return Err(e.into());
            }
        }

        let stamp = format!(
            "UPDATE {} SET locked_at = now(), locked_by = current_user || '@' || pg_backend_pid() WHERE id = 1",
            table
        );
        // The transaction is open; never hand this connection back to the pool.
        if let Err(e) = client.execute(&stamp, &[]).await {
            drop(Object::take(client));
            return Err(e.into());
        }

        debug!("Acquired migration lock {}", table);
        Ok(Some(Box::new(PostgresLockGuard {
            name: lock_name.to_string(),
            client: Some(client),
        })))
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Transaction pinned to one pooled connection.
///
/// Dropped without commit or rollback, the connection is detached from the
/// pool and closed so the server rolls the transaction back.
struct PostgresTransaction {
    client: Option<Object>,
}

impl PostgresTransaction {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| MigrateError::Config("transaction already finished".into()))
    }

    async fn finish(mut self: Box<Self>, statement: &str) -> Result<()> {
        let client = self
            .client
            .take()
            .ok_or_else(|| MigrateError::Config("transaction already finished".into()))?;
        if let Err(e) = client.batch_execute(statement).await {
            drop(Object::take(client));
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionHandle for PostgresTransaction {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let rows = self.client()?.query(sql, &as_params(params)).await?;
        decode_rows(&rows)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        Ok(self.client()?.execute(sql, &as_params(params)).await?)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            drop(Object::take(client));
        }
    }
}

/// Open transaction holding the lock row.
struct PostgresLockGuard {
    name: String,
    client: Option<Object>,
}

#[async_trait]
impl MigrationLockGuard for PostgresLockGuard {
    fn lock_name(&self) -> &str {
        &self.name
    }

    async fn release(mut self: Box<Self>) -> Result<()> {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.batch_execute("COMMIT").await {
                drop(Object::take(client));
                return Err(e.into());
            }
            debug!("Released migration lock {}", self.name);
        }
        Ok(())
    }
}

impl Drop for PostgresLockGuard {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            drop(Object::take(client));
        }
    }
}

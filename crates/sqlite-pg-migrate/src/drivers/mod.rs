//! Database driver implementations.
//!
//! - [`sqlite`]: SQLite driver (sqlx)
//! - [`postgres`]: PostgreSQL driver (tokio-postgres + deadpool)
//!
//! Each driver implements the core seams: a `DatabaseHandle`, an
//! `Introspector`/`Normalizer` pair registered in the
//! [`DriverCatalog`](crate::core::DriverCatalog), and a `Dialect`.
//!
//! # Adding a database
//!
//! 1. Create a module under `drivers/`
//! 2. Implement `DatabaseHandle`, `Introspector`, `Normalizer` and `Dialect`
//! 3. Add a variant to [`DialectImpl`] and a branch to [`connect`]
//! 4. Register the introspector pair in `DriverCatalog::with_builtins()`

pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use postgres::{
    PostgresDialect, PostgresHandle, PostgresIntrospector, PostgresNormalizer, SslMode,
};
pub use sqlite::{SqliteDialect, SqliteHandle, SqliteIntrospector, SqliteNormalizer};

use crate::config::ConnectionConfig;
use crate::core::capability::DialectKind;
use crate::core::traits::{DatabaseHandle, Dialect, InsertColumn, SelectQueryOptions};
use crate::dialect::FromCanonical;
use crate::error::Result;

/// Open a handle for a connection config.
pub async fn connect(config: &ConnectionConfig) -> Result<Arc<dyn DatabaseHandle>> {
    match config.dialect {
        DialectKind::Sqlite => Ok(Arc::new(SqliteHandle::connect(config).await?)),
        DialectKind::Postgres => Ok(Arc::new(PostgresHandle::connect(config).await?)),
    }
}

/// Enum-based static dispatch for dialects.
///
/// The compiler generates a match instead of a vtable call.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Sqlite(SqliteDialect),
    Postgres(PostgresDialect),
}

impl DialectImpl {
    /// Dialect implementation for a dialect kind.
    pub fn for_kind(kind: DialectKind) -> Self {
        match kind {
            DialectKind::Sqlite => DialectImpl::Sqlite(SqliteDialect::new()),
            DialectKind::Postgres => DialectImpl::Postgres(PostgresDialect::new()),
        }
    }

    /// Create a dialect implementation from a database type string.
    ///
    /// # Errors
    ///
    /// Returns an error if the database type is not recognized.
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        Ok(Self::for_kind(DialectKind::from_name(db_type)?))
    }
}

impl Dialect for DialectImpl {
    fn kind(&self) -> DialectKind {
        match self {
            DialectImpl::Sqlite(d) => d.kind(),
            DialectImpl::Postgres(d) => d.kind(),
        }
    }

    fn quote_ident(&self, name: &str) -> String {
        match self {
            DialectImpl::Sqlite(d) => d.quote_ident(name),
            DialectImpl::Postgres(d) => d.quote_ident(name),
        }
    }

    fn qualify(&self, namespace: &str, name: &str) -> String {
        match self {
            DialectImpl::Sqlite(d) => d.qualify(namespace, name),
            DialectImpl::Postgres(d) => d.qualify(namespace, name),
        }
    }

    fn param_placeholder(&self, index: usize) -> String {
        match self {
            DialectImpl::Sqlite(d) => d.param_placeholder(index),
            DialectImpl::Postgres(d) => d.param_placeholder(index),
        }
    }

    fn text_param(&self, index: usize, target_type: &str) -> String {
        match self {
            DialectImpl::Sqlite(d) => d.text_param(index, target_type),
            DialectImpl::Postgres(d) => d.text_param(index, target_type),
        }
    }

    fn type_mapper(&self) -> &dyn FromCanonical {
        match self {
            DialectImpl::Sqlite(d) => d.type_mapper(),
            DialectImpl::Postgres(d) => d.type_mapper(),
        }
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        match self {
            DialectImpl::Sqlite(d) => d.bool_literal(value),
            DialectImpl::Postgres(d) => d.bool_literal(value),
        }
    }

    fn cast_to_text(&self, column: &str) -> String {
        match self {
            DialectImpl::Sqlite(d) => d.cast_to_text(column),
            DialectImpl::Postgres(d) => d.cast_to_text(column),
        }
    }

    fn build_select_query(&self, opts: &SelectQueryOptions) -> String {
        match self {
            DialectImpl::Sqlite(d) => d.build_select_query(opts),
            DialectImpl::Postgres(d) => d.build_select_query(opts),
        }
    }

    fn build_count_query(&self, table_ref: &str) -> String {
        match self {
            DialectImpl::Sqlite(d) => d.build_count_query(table_ref),
            DialectImpl::Postgres(d) => d.build_count_query(table_ref),
        }
    }

    fn build_insert_query(
        &self,
        table_ref: &str,
        columns: &[InsertColumn],
        row_count: usize,
        conflict_columns: Option<&[String]>,
    ) -> String {
        match self {
            DialectImpl::Sqlite(d) => {
                d.build_insert_query(table_ref, columns, row_count, conflict_columns)
            }
            DialectImpl::Postgres(d) => {
                d.build_insert_query(table_ref, columns, row_count, conflict_columns)
            }
        }
    }
}

//! Core traits for dialect-neutral discovery and migration.
//!
//! - [`DatabaseHandle`] / [`TransactionHandle`]: the only view the core has of
//!   a live connection (parameterized query, transaction, dialect name)
//! - [`MigrationLockGuard`]: proof that the engine-appropriate migration lock is held
//! - [`Introspector`]: issues engine-native metadata queries and returns raw rows
//! - [`Normalizer`]: turns raw rows into canonical types and defaults
//! - [`Dialect`]: SQL syntax strategy for each engine
//!
//! # Design Patterns
//!
//! - **Strategy**: `Dialect`, `Introspector` and `Normalizer` are interchangeable per engine
//! - **Template Method**: `Dialect` builds whole statements from a few per-engine primitives

use async_trait::async_trait;

use crate::error::Result;

use super::capability::DialectKind;
use super::schema::{DefaultValue, IndexPart};
use super::value::{Row, SqlValue};
use crate::dialect::{FromCanonical, ToCanonical};

/// A live database connection (or pool) as seen by the core.
///
/// Pooling, authentication and TLS belong to the implementation.
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// Dialect of the connected engine.
    fn dialect(&self) -> DialectKind;

    /// Namespace used when none is given (`main` / the configured schema).
    fn namespace(&self) -> &str;

    /// Whether foreign keys are checked on write.
    fn enforces_foreign_keys(&self) -> bool {
        self.dialect().capabilities().foreign_keys
    }

    /// Run a parameterized query and return all rows.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a parameterized statement and return the affected row count.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Open a transaction on a connection of its own.
    async fn begin(&self) -> Result<Box<dyn TransactionHandle>>;

    /// Try once to take the migration lock. `Ok(None)` means another
    /// migration holds it.
    async fn try_acquire_migration_lock(
        &self,
        lock_name: &str,
    ) -> Result<Option<Box<dyn MigrationLockGuard>>>;

    /// Close the underlying pool.
    async fn close(&self) {}
}

/// An open transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait TransactionHandle: Send {
    /// Run a parameterized query inside the transaction.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a parameterized statement inside the transaction.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Held migration lock. Released by `release`, and also by the engine when
/// the process or connection dies.
#[async_trait]
pub trait MigrationLockGuard: Send {
    /// Name of the lock held.
    fn lock_name(&self) -> &str;

    /// Release the lock.
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Kind of relation listed by an introspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawRelationKind {
    Table,
    View,
    MaterializedView,
}

/// A table or view as listed by the engine.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub name: String,
    pub kind: RawRelationKind,
    /// View body, or the CREATE statement for SQLite objects.
    pub definition: Option<String>,
    pub populated: Option<bool>,
    pub estimated_rows: Option<i64>,
}

/// A column as described by the engine.
#[derive(Debug, Clone, Default)]
pub struct RawColumn {
    pub name: String,
    pub native_type: String,
    pub max_length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub is_nullable: bool,
    /// Default expression exactly as stored in the catalog.
    pub default: Option<String>,
    /// 1-based position in the primary key.
    pub pk_position: Option<u32>,
    /// Catalog says identity/autoincrement.
    pub is_identity: bool,
    pub ordinal_pos: i32,
}

/// An index as described by the engine.
#[derive(Debug, Clone)]
pub struct RawIndex {
    pub name: String,
    pub is_unique: bool,
    pub parts: Vec<IndexPart>,
    pub predicate: Option<String>,
    pub method: Option<String>,
    pub include: Vec<String>,
}

/// A foreign key as described by the engine.
#[derive(Debug, Clone)]
pub struct RawForeignKey {
    /// Engines without named constraints report `None`.
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub ref_schema: Option<String>,
    pub ref_table: String,
    /// Empty when the key implicitly targets the referenced primary key.
    pub ref_columns: Vec<String>,
    pub on_delete: String,
    pub on_update: String,
    pub deferrable: bool,
    pub initially_deferred: bool,
}

/// Issues engine-native metadata queries.
///
/// Implementations hold no per-call state; one instance serves concurrent
/// discovery calls.
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Dialect this introspector understands.
    fn dialect(&self) -> DialectKind;

    /// List tables (and views when asked) in a namespace.
    async fn list_tables(
        &self,
        db: &dyn DatabaseHandle,
        namespace: &str,
        include_views: bool,
    ) -> Result<Vec<RawTable>>;

    /// Columns of one table, in ordinal order.
    async fn columns(
        &self,
        db: &dyn DatabaseHandle,
        namespace: &str,
        table: &str,
    ) -> Result<Vec<RawColumn>>;

    /// Secondary indexes of one table (primary key indexes excluded).
    async fn indexes(
        &self,
        db: &dyn DatabaseHandle,
        namespace: &str,
        table: &str,
    ) -> Result<Vec<RawIndex>>;

    /// Foreign keys of one table.
    async fn foreign_keys(
        &self,
        db: &dyn DatabaseHandle,
        namespace: &str,
        table: &str,
    ) -> Result<Vec<RawForeignKey>>;
}

/// Default after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDefault {
    pub value: Option<DefaultValue>,
    /// The default is a sequence draw, i.e. the column auto-increments.
    pub implies_auto_increment: bool,
}

/// Maps raw introspection output into canonical form.
pub trait Normalizer: Send + Sync {
    /// Dialect this normalizer understands.
    fn dialect(&self) -> DialectKind;

    /// Native type → canonical converter.
    fn type_converter(&self) -> &dyn ToCanonical;

    /// Whether declared types are only advisory.
    fn types_are_advisory(&self) -> bool {
        self.dialect().capabilities().dynamic_typing
    }

    /// Parse a catalog default expression.
    fn normalize_default(&self, raw: &str) -> NormalizedDefault;

    /// Whether the column auto-increments without an explicit default
    /// (identity columns, SQLite rowid aliases).
    fn is_auto_increment(&self, column: &RawColumn, pk_len: usize, table_sql: Option<&str>) -> bool;
}

/// Options for building a batch SELECT.
#[derive(Debug, Clone, Default)]
pub struct SelectQueryOptions {
    /// Already qualified and quoted table reference.
    pub table_ref: String,
    /// Columns to read.
    pub columns: Vec<SelectColumn>,
    /// Order by these columns.
    pub order_by: Vec<String>,
    /// Order by the engine's implicit row id instead.
    pub order_by_rowid: bool,
    /// Keyset pagination: add `WHERE col > $1`.
    pub keyset_column: Option<String>,
    /// Row limit.
    pub limit: Option<usize>,
    /// Row offset.
    pub offset: Option<u64>,
}

/// A column in a batch SELECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    pub name: String,
    /// Read through a text cast because the type has no value mapping.
    pub as_text: bool,
}

/// SQL syntax strategy.
pub trait Dialect: Send + Sync {
    /// Dialect identifier.
    fn kind(&self) -> DialectKind;

    /// Quote an identifier, doubling embedded quotes.
    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Qualified, quoted table reference.
    fn qualify(&self, namespace: &str, name: &str) -> String;

    /// Placeholder for the given 1-based parameter index.
    fn param_placeholder(&self, index: usize) -> String;

    /// Canonical → native type renderer.
    fn type_mapper(&self) -> &dyn FromCanonical;

    /// Boolean literal.
    fn bool_literal(&self, value: bool) -> &'static str;

    /// Expression reading `column` as text.
    fn cast_to_text(&self, column: &str) -> String;

    /// Build a bounded SELECT window.
    fn build_select_query(&self, opts: &SelectQueryOptions) -> String {
        let cols = opts
            .columns
            .iter()
            .map(|c| {
                let quoted = self.quote_ident(&c.name);
                if c.as_text {
                    format!("{} AS {}", self.cast_to_text(&quoted), quoted)
                } else {
                    quoted
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("SELECT {} FROM {}", cols, opts.table_ref);

        if let Some(ref keyset) = opts.keyset_column {
            sql.push_str(&format!(
                " WHERE {} > {}",
                self.quote_ident(keyset),
                self.param_placeholder(1)
            ));
        }

        if opts.order_by_rowid {
            sql.push_str(" ORDER BY rowid");
        } else if !opts.order_by.is_empty() {
            let order = opts
                .order_by
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {}", order));
        }

        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = opts.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }

    /// Build a row count query.
    fn build_count_query(&self, table_ref: &str) -> String {
        format!("SELECT COUNT(*) AS row_count FROM {}", table_ref)
    }

    /// Placeholder for a value sent as text and converted by the server.
    fn text_param(&self, index: usize, _target_type: &str) -> String {
        self.param_placeholder(index)
    }

    /// Build a multi-row INSERT, optionally upserting on `conflict_columns`.
    fn build_insert_query(
        &self,
        table_ref: &str,
        columns: &[InsertColumn],
        row_count: usize,
        conflict_columns: Option<&[String]>,
    ) -> String {
        let quoted_cols = columns
            .iter()
            .map(|c| self.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");

        let mut param = 0;
        let rows = (0..row_count)
            .map(|_| {
                let placeholders = columns
                    .iter()
                    .map(|c| {
                        param += 1;
                        match c.text_cast {
                            Some(ref ty) => self.text_param(param, ty),
                            None => self.param_placeholder(param),
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", placeholders)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("INSERT INTO {} ({}) VALUES {}", table_ref, quoted_cols, rows);

        if let Some(pk_columns) = conflict_columns {
            let conflict_cols = pk_columns
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ON CONFLICT ({}) DO", conflict_cols));

            let non_pk_cols: Vec<_> = columns
                .iter()
                .filter(|c| !pk_columns.contains(&c.name))
                .collect();
            if non_pk_cols.is_empty() {
                sql.push_str(" NOTHING");
            } else {
                let update_set = non_pk_cols
                    .iter()
                    .map(|c| {
                        let q = self.quote_ident(&c.name);
                        format!("{} = EXCLUDED.{}", q, q)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!(" UPDATE SET {}", update_set));
            }
        }

        sql
    }
}

/// A column in a bulk INSERT.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InsertColumn {
    pub name: String,
    /// Target type when the value travels as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_cast: Option<String>,
}

impl InsertColumn {
    /// Column bound with its natural parameter type.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text_cast: None,
        }
    }
}

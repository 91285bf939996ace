//! Static per-dialect capability table.
//!
//! Every component that must special-case an engine looks the answer up here,
//! keyed by [`DialectKind`]. The kind is resolved once when a connection is
//! opened and passed explicitly from then on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// The reference dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// Single-file, dynamically typed engine introspected through pragmas.
    Sqlite,
    /// Client/server, strictly typed engine introspected through catalogs.
    Postgres,
}

impl DialectKind {
    /// All supported dialects.
    pub const ALL: [DialectKind; 2] = [DialectKind::Sqlite, DialectKind::Postgres];

    /// Parse a dialect name. Accepts the usual aliases.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DialectKind::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            other => Err(MigrateError::UnsupportedDialect(other.to_string())),
        }
    }

    /// Canonical dialect name.
    pub fn name(&self) -> &'static str {
        match self {
            DialectKind::Sqlite => "sqlite",
            DialectKind::Postgres => "postgres",
        }
    }

    /// Capability descriptor for this dialect.
    pub fn capabilities(&self) -> &'static Capabilities {
        match self {
            DialectKind::Sqlite => &SQLITE_CAPABILITIES,
            DialectKind::Postgres => &POSTGRES_CAPABILITIES,
        }
    }

    /// Namespace used when a connection does not name one.
    pub fn default_namespace(&self) -> &'static str {
        match self {
            DialectKind::Sqlite => "main",
            DialectKind::Postgres => "public",
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DialectKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

/// What schema features a dialect supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub views: bool,
    pub materialized_views: bool,
    pub foreign_keys: bool,
    pub deferrable_constraints: bool,
    pub partial_indexes: bool,
    pub expression_indexes: bool,
    pub native_arrays: bool,
    pub native_json: bool,
    pub native_boolean: bool,
    pub native_uuid: bool,
    pub text_search: bool,
    pub interval_type: bool,
    /// Tables live in named schemas that can be created.
    pub namespaces: bool,
    pub alter_column_type: bool,
    pub alter_column_nullability: bool,
    pub alter_column_default: bool,
    /// `ALTER TABLE ... ADD CONSTRAINT` for foreign and primary keys.
    pub alter_add_constraint: bool,
    /// `CREATE TABLE` may reference a table that does not exist yet.
    pub forward_references: bool,
    pub transactional_ddl: bool,
    pub identity_columns: bool,
    /// Declared column types are affinities rather than constraints.
    pub dynamic_typing: bool,
    /// Upper bound on bind parameters in a single statement.
    pub max_bind_params: usize,
}

/// SQLite capabilities (3.35+, as bundled by sqlx).
pub static SQLITE_CAPABILITIES: Capabilities = Capabilities {
    views: true,
    materialized_views: false,
    foreign_keys: true,
    deferrable_constraints: true,
    partial_indexes: true,
    expression_indexes: true,
    native_arrays: false,
    native_json: false,
    native_boolean: false,
    native_uuid: false,
    text_search: false,
    interval_type: false,
    namespaces: false,
    alter_column_type: false,
    alter_column_nullability: false,
    alter_column_default: false,
    alter_add_constraint: false,
    forward_references: true,
    transactional_ddl: true,
    identity_columns: false,
    dynamic_typing: true,
    max_bind_params: 32_766,
};

/// PostgreSQL capabilities (11+).
pub static POSTGRES_CAPABILITIES: Capabilities = Capabilities {
    views: true,
    materialized_views: true,
    foreign_keys: true,
    deferrable_constraints: true,
    partial_indexes: true,
    expression_indexes: true,
    native_arrays: true,
    native_json: true,
    native_boolean: true,
    native_uuid: true,
    text_search: true,
    interval_type: true,
    namespaces: true,
    alter_column_type: true,
    alter_column_nullability: true,
    alter_column_default: true,
    alter_add_constraint: true,
    forward_references: false,
    transactional_ddl: true,
    identity_columns: true,
    dynamic_typing: false,
    max_bind_params: 65_535,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_name() {
        assert_eq!(DialectKind::from_name("sqlite").unwrap(), DialectKind::Sqlite);
        assert_eq!(DialectKind::from_name("SQLite3").unwrap(), DialectKind::Sqlite);
        assert_eq!(DialectKind::from_name("postgresql").unwrap(), DialectKind::Postgres);
        assert_eq!(DialectKind::from_name(" pg ").unwrap(), DialectKind::Postgres);
    }

    #[test]
    fn test_unknown_dialect_is_unsupported() {
        let err = DialectKind::from_name("oracle").unwrap_err();
        assert!(matches!(err, MigrateError::UnsupportedDialect(ref d) if d == "oracle"));
    }

    #[test]
    fn test_capability_lookup() {
        let sqlite = DialectKind::Sqlite.capabilities();
        assert!(sqlite.dynamic_typing);
        assert!(!sqlite.native_arrays);
        assert!(!sqlite.alter_add_constraint);
        assert!(sqlite.forward_references);

        let pg = DialectKind::Postgres.capabilities();
        assert!(pg.native_arrays);
        assert!(pg.materialized_views);
        assert!(!pg.forward_references);
        assert_eq!(pg.max_bind_params, 65_535);
    }
}

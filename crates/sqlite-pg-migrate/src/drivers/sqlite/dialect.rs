//! SQLite SQL dialect (Strategy pattern).

use crate::core::capability::DialectKind;
use crate::core::traits::Dialect;
use crate::dialect::{FromCanonical, SqliteFromCanonical};

/// SQLite dialect implementation.
///
/// A connection sees one schema (`main`), so table references are never
/// qualified.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect {
    mapper: SqliteFromCanonical,
}

impl SqliteDialect {
    /// Create a new SQLite dialect instance.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn qualify(&self, _namespace: &str, name: &str) -> String {
        self.quote_ident(name)
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn type_mapper(&self) -> &dyn FromCanonical {
        &self.mapper
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn cast_to_text(&self, column: &str) -> String {
        format!("CAST({} AS TEXT)", column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::{InsertColumn, SelectColumn, SelectQueryOptions};

    #[test]
    fn test_qualify_ignores_namespace() {
        let dialect = SqliteDialect::new();
        assert_eq!(dialect.qualify("main", "users"), "\"users\"");
    }

    #[test]
    fn test_build_select_query_rowid() {
        let dialect = SqliteDialect::new();
        let opts = SelectQueryOptions {
            table_ref: dialect.qualify("main", "notes"),
            columns: vec![SelectColumn {
                name: "body".to_string(),
                as_text: false,
            }],
            order_by_rowid: true,
            limit: Some(500),
            offset: Some(1000),
            ..Default::default()
        };
        assert_eq!(
            dialect.build_select_query(&opts),
            "SELECT \"body\" FROM \"notes\" ORDER BY rowid LIMIT 500 OFFSET 1000"
        );
    }

    #[test]
    fn test_build_insert_query() {
        let dialect = SqliteDialect::new();
        let sql = dialect.build_insert_query(
            "\"users\"",
            &[InsertColumn::plain("id"), InsertColumn::plain("email")],
            2,
            None,
        );
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\", \"email\") VALUES (?, ?), (?, ?)"
        );
    }
}

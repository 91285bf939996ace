//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! Provides PostgreSQL-specific SQL syntax for identifier qualification,
//! parameter placeholders and casts.

use crate::core::capability::DialectKind;
use crate::core::traits::Dialect;
use crate::dialect::{FromCanonical, PostgresFromCanonical};

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect {
    mapper: PostgresFromCanonical,
}

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn qualify(&self, namespace: &str, name: &str) -> String {
        format!("{}.{}", self.quote_ident(namespace), self.quote_ident(name))
    }

    fn param_placeholder(&self, index: usize) -> String {
        // PostgreSQL uses $1, $2, etc. (1-based)
        format!("${}", index)
    }

    fn type_mapper(&self) -> &dyn FromCanonical {
        &self.mapper
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn cast_to_text(&self, column: &str) -> String {
        format!("{}::text", column)
    }

    fn text_param(&self, index: usize, target_type: &str) -> String {
        format!("CAST(${}::text AS {})", index, target_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::{InsertColumn, SelectColumn, SelectQueryOptions};

    fn make_test_columns(names: &[&str]) -> Vec<SelectColumn> {
        names
            .iter()
            .map(|n| SelectColumn {
                name: n.to_string(),
                as_text: false,
            })
            .collect()
    }

    #[test]
    fn test_quote_ident() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.quote_ident("name"), "\"name\"");
        assert_eq!(dialect.quote_ident("table\"name"), "\"table\"\"name\"");
        assert_eq!(dialect.quote_ident("Users"), "\"Users\"");
        assert_eq!(dialect.qualify("public", "users"), "\"public\".\"users\"");
    }

    #[test]
    fn test_param_placeholder() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.param_placeholder(1), "$1");
        assert_eq!(dialect.param_placeholder(10), "$10");
    }

    #[test]
    fn test_build_select_query_with_keyset() {
        let dialect = PostgresDialect::new();
        let opts = SelectQueryOptions {
            table_ref: dialect.qualify("public", "users"),
            columns: make_test_columns(&["id", "name"]),
            order_by: vec!["id".to_string()],
            keyset_column: Some("id".to_string()),
            limit: Some(1000),
            ..Default::default()
        };

        let sql = dialect.build_select_query(&opts);
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"public\".\"users\" WHERE \"id\" > $1 ORDER BY \"id\" LIMIT 1000"
        );
    }

    #[test]
    fn test_build_select_query_text_cast() {
        let dialect = PostgresDialect::new();
        let opts = SelectQueryOptions {
            table_ref: dialect.qualify("public", "events"),
            columns: vec![SelectColumn {
                name: "span".to_string(),
                as_text: true,
            }],
            order_by: vec!["span".to_string()],
            limit: Some(10),
            offset: Some(20),
            ..Default::default()
        };

        let sql = dialect.build_select_query(&opts);
        assert!(sql.starts_with("SELECT \"span\"::text AS \"span\""));
        assert!(sql.ends_with("LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn test_build_insert_query_upsert() {
        let dialect = PostgresDialect::new();
        let sql = dialect.build_insert_query(
            "\"public\".\"users\"",
            &[
                InsertColumn::plain("id"),
                InsertColumn::plain("name"),
                InsertColumn::plain("email"),
            ],
            2,
            Some(&["id".to_string()]),
        );

        assert!(sql.starts_with("INSERT INTO \"public\".\"users\" (\"id\", \"name\", \"email\")"));
        assert!(sql.contains("VALUES ($1, $2, $3), ($4, $5, $6)"));
        assert!(sql.contains("ON CONFLICT (\"id\") DO UPDATE SET"));
        assert!(sql.contains("\"name\" = EXCLUDED.\"name\""));
        assert!(sql.contains("\"email\" = EXCLUDED.\"email\""));
    }

    #[test]
    fn test_build_insert_query_pk_only() {
        let dialect = PostgresDialect::new();
        let sql = dialect.build_insert_query(
            "\"public\".\"tags\"",
            &[InsertColumn::plain("id")],
            1,
            Some(&["id".to_string()]),
        );
        assert!(sql.ends_with("ON CONFLICT (\"id\") DO NOTHING"));
    }

    #[test]
    fn test_build_insert_query_text_cast() {
        let dialect = PostgresDialect::new();
        let columns = vec![
            InsertColumn::plain("id"),
            InsertColumn {
                name: "span".to_string(),
                text_cast: Some("interval".to_string()),
            },
        ];
        let sql = dialect.build_insert_query("\"public\".\"events\"", &columns, 2, None);
        assert!(sql.ends_with("VALUES ($1, CAST($2::text AS interval)), ($3, CAST($4::text AS interval))"));
    }
}

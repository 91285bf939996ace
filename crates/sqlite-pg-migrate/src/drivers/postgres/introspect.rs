//! PostgreSQL introspection through `pg_catalog` and `information_schema`.

use async_trait::async_trait;
use tracing::debug;

use crate::core::capability::DialectKind;
use crate::core::schema::{IndexPart, ReferentialAction};
use crate::core::traits::{
    DatabaseHandle, Introspector, RawColumn, RawForeignKey, RawIndex, RawRelationKind, RawTable,
};
use crate::core::value::SqlValue;
use crate::error::Result;

const LIST_RELATIONS: &str = r#"
    SELECT
        c.relname::text AS name,
        c.relkind::text AS kind,
        CASE WHEN c.relkind IN ('v', 'm') THEN pg_get_viewdef(c.oid, true) END AS definition,
        CASE WHEN c.relkind = 'm' THEN c.relispopulated END AS populated,
        CASE WHEN c.relkind IN ('r', 'p') THEN GREATEST(c.reltuples, 0)::int8 END AS estimated_rows
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relkind IN ('r', 'p', 'v', 'm')
      AND NOT c.relispartition
    ORDER BY c.relname
"#;

const LIST_COLUMNS: &str = r#"
    SELECT
        c.column_name::text AS name,
        c.udt_name::text AS native_type,
        c.character_maximum_length::int4 AS max_length,
        CASE WHEN c.data_type = 'numeric' THEN c.numeric_precision::int4 END AS precision,
        CASE WHEN c.data_type = 'numeric' THEN c.numeric_scale::int4 END AS scale,
        c.is_nullable = 'YES' AS is_nullable,
        c.column_default::text AS column_default,
        c.is_identity = 'YES' AS is_identity,
        c.ordinal_position::int4 AS ordinal_pos,
        k.ordinal_position::int4 AS pk_position
    FROM information_schema.columns c
    LEFT JOIN information_schema.table_constraints tc
        ON tc.table_schema = c.table_schema
       AND tc.table_name = c.table_name
       AND tc.constraint_type = 'PRIMARY KEY'
    LEFT JOIN information_schema.key_column_usage k
        ON k.constraint_schema = tc.constraint_schema
       AND k.constraint_name = tc.constraint_name
       AND k.table_name = c.table_name
       AND k.column_name = c.column_name
    WHERE c.table_schema = $1 AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

// indkey holds 0 for expression terms; pg_get_indexdef renders each term.
const LIST_INDEXES: &str = r#"
    SELECT
        i.relname::text AS name,
        ix.indisunique AS is_unique,
        am.amname::text AS method,
        ix.indnkeyatts::int4 AS key_count,
        pg_get_expr(ix.indpred, ix.indrelid) AS predicate,
        ARRAY(
            SELECT pg_get_indexdef(ix.indexrelid, k, true)
            FROM generate_series(1, ix.indnatts) AS k
            ORDER BY k
        ) AS terms,
        ARRAY(
            SELECT ix.indkey[k - 1] = 0
            FROM generate_series(1, ix.indnatts) AS k
            ORDER BY k
        ) AS is_expression
    FROM pg_catalog.pg_index ix
    JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
    JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_am am ON am.oid = i.relam
    WHERE n.nspname = $1
      AND t.relname = $2
      AND NOT ix.indisprimary
    ORDER BY i.relname
"#;

const LIST_FOREIGN_KEYS: &str = r#"
    SELECT
        con.conname::text AS name,
        ARRAY(
            SELECT a.attname::text
            FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
            ORDER BY k.ord
        ) AS columns,
        rn.nspname::text AS ref_schema,
        rt.relname::text AS ref_table,
        ARRAY(
            SELECT a.attname::text
            FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
            ORDER BY k.ord
        ) AS ref_columns,
        con.confdeltype::text AS on_delete,
        con.confupdtype::text AS on_update,
        con.condeferrable AS deferrable,
        con.condeferred AS initially_deferred
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_class t ON t.oid = con.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_class rt ON rt.oid = con.confrelid
    JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
    WHERE con.contype = 'f'
      AND n.nspname = $1
      AND t.relname = $2
    ORDER BY con.conname
"#;

/// Reads PostgreSQL metadata. Holds no state.
#[derive(Debug, Clone, Default)]
pub struct PostgresIntrospector;

impl PostgresIntrospector {
    /// Create a new PostgreSQL introspector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Introspector for PostgresIntrospector {
    fn dialect(&self) -> DialectKind {
        DialectKind::Postgres
    }

    async fn list_tables(
        &self,
        db: &dyn DatabaseHandle,
        namespace: &str,
        include_views: bool,
    ) -> Result<Vec<RawTable>> {
        let rows = db
            .query(LIST_RELATIONS, &[SqlValue::from(namespace)])
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(name) = row.get_str("name") else {
                continue;
            };
            let kind = match row.get_str("kind").as_deref() {
                Some("v") => RawRelationKind::View,
                Some("m") => RawRelationKind::MaterializedView,
                _ => RawRelationKind::Table,
            };
            if kind != RawRelationKind::Table && !include_views {
                continue;
            }
            tables.push(RawTable {
                name,
                kind,
                definition: row
                    .get_str("definition")
                    .map(|d| d.trim().trim_end_matches(';').trim().to_string()),
                populated: row.get_bool("populated"),
                estimated_rows: row.get_i64("estimated_rows"),
            });
        }

        debug!("Listed {} relations in schema '{}'", tables.len(), namespace);
        Ok(tables)
    }

    async fn columns(
        &self,
        db: &dyn DatabaseHandle,
        namespace: &str,
        table: &str,
    ) -> Result<Vec<RawColumn>> {
        let rows = db
            .query(
                LIST_COLUMNS,
                &[SqlValue::from(namespace), SqlValue::from(table)],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| RawColumn {
                name: row.get_str("name").unwrap_or_default(),
                native_type: row.get_str("native_type").unwrap_or_default(),
                max_length: row.get_i64("max_length").map(|v| v as u32),
                precision: row.get_i64("precision").map(|v| v as u32),
                scale: row.get_i64("scale").map(|v| v as u32),
                is_nullable: row.get_bool("is_nullable").unwrap_or(true),
                default: row.get_str("column_default"),
                pk_position: row.get_i64("pk_position").map(|v| v as u32),
                is_identity: row.get_bool("is_identity").unwrap_or(false),
                ordinal_pos: row.get_i64("ordinal_pos").unwrap_or(0) as i32,
            })
            .collect())
    }

    async fn indexes(
        &self,
        db: &dyn DatabaseHandle,
        namespace: &str,
        table: &str,
    ) -> Result<Vec<RawIndex>> {
        let rows = db
            .query(
                LIST_INDEXES,
                &[SqlValue::from(namespace), SqlValue::from(table)],
            )
            .await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            let terms = row.get_str_list("terms");
            let is_expression: Vec<bool> = row
                .get_str_list("is_expression")
                .iter()
                .map(|s| s == "true")
                .collect();
            let key_count = row.get_i64("key_count").unwrap_or(terms.len() as i64) as usize;

            let mut parts = Vec::with_capacity(key_count);
            let mut include = Vec::new();
            for (pos, term) in terms.into_iter().enumerate() {
                let expr = is_expression.get(pos).copied().unwrap_or(false);
                if pos >= key_count {
                    include.push(unquote_ident(&term));
                } else if expr {
                    parts.push(IndexPart::Expression(term));
                } else {
                    parts.push(IndexPart::Column(unquote_ident(&term)));
                }
            }

            indexes.push(RawIndex {
                name: row.get_str("name").unwrap_or_default(),
                is_unique: row.get_bool("is_unique").unwrap_or(false),
                parts,
                predicate: row.get_str("predicate"),
                method: row.get_str("method"),
                include,
            });
        }
        Ok(indexes)
    }

    async fn foreign_keys(
        &self,
        db: &dyn DatabaseHandle,
        namespace: &str,
        table: &str,
    ) -> Result<Vec<RawForeignKey>> {
        let rows = db
            .query(
                LIST_FOREIGN_KEYS,
                &[SqlValue::from(namespace), SqlValue::from(table)],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| RawForeignKey {
                name: row.get_str("name"),
                columns: row.get_str_list("columns"),
                ref_schema: row.get_str("ref_schema"),
                ref_table: row.get_str("ref_table").unwrap_or_default(),
                ref_columns: row.get_str_list("ref_columns"),
                on_delete: action_sql(row.get_str("on_delete")),
                on_update: action_sql(row.get_str("on_update")),
                deferrable: row.get_bool("deferrable").unwrap_or(false),
                initially_deferred: row.get_bool("initially_deferred").unwrap_or(false),
            })
            .collect())
    }
}

fn action_sql(code: Option<String>) -> String {
    ReferentialAction::from_pg_code(code.as_deref().unwrap_or("a"))
        .as_sql()
        .to_string()
}

/// `pg_get_indexdef` quotes column names that need it.
fn unquote_ident(term: &str) -> String {
    match term.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => term.to_string(),
    }
}

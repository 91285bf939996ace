//! SQLite introspection through `sqlite_master` and the pragma table-valued
//! functions.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::core::capability::DialectKind;
use crate::core::schema::IndexPart;
use crate::core::traits::{
    DatabaseHandle, Introspector, RawColumn, RawForeignKey, RawIndex, RawRelationKind, RawTable,
};
use crate::core::value::SqlValue;
use crate::error::Result;

static VIEW_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*CREATE\s+(?:TEMP\w*\s+)?VIEW\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:"(?:[^"]|"")*"|\S+)(?:\s*\([^)]*\))?\s+AS\s+(.*?);?\s*$"#)
        .expect("valid view regex")
});

/// Reads SQLite metadata. Holds no state.
#[derive(Debug, Clone, Default)]
pub struct SqliteIntrospector;

impl SqliteIntrospector {
    /// Create a new SQLite introspector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Introspector for SqliteIntrospector {
    fn dialect(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    async fn list_tables(
        &self,
        db: &dyn DatabaseHandle,
        _namespace: &str,
        include_views: bool,
    ) -> Result<Vec<RawTable>> {
        let rows = db
            .query(
                "SELECT name, type, sql FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
                &[],
            )
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(name) = row.get_str("name") else {
                continue;
            };
            let sql = row.get_str("sql");
            let is_view = row.get_str("type").as_deref() == Some("view");
            if is_view && !include_views {
                continue;
            }
            let definition = if is_view {
                sql.as_deref().and_then(view_body)
            } else {
                sql
            };
            tables.push(RawTable {
                name,
                kind: if is_view {
                    RawRelationKind::View
                } else {
                    RawRelationKind::Table
                },
                definition,
                populated: None,
                estimated_rows: None,
            });
        }

        debug!("Listed {} SQLite relations", tables.len());
        Ok(tables)
    }

    async fn columns(
        &self,
        db: &dyn DatabaseHandle,
        _namespace: &str,
        table: &str,
    ) -> Result<Vec<RawColumn>> {
        let rows = db
            .query(
                "SELECT cid, name, type, \"notnull\", dflt_value, pk \
                 FROM pragma_table_info(?) ORDER BY cid",
                &[SqlValue::from(table)],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let pk = row.get_i64("pk").unwrap_or(0);
                RawColumn {
                    name: row.get_str("name").unwrap_or_default(),
                    native_type: row.get_str("type").unwrap_or_default(),
                    max_length: None,
                    precision: None,
                    scale: None,
                    // Key columns are treated as NOT NULL even where SQLite
                    // would tolerate a NULL.
                    is_nullable: row.get_i64("notnull").unwrap_or(0) == 0 && pk == 0,
                    default: row.get_str("dflt_value"),
                    pk_position: (pk > 0).then_some(pk as u32),
                    is_identity: false,
                    ordinal_pos: row.get_i64("cid").unwrap_or(0) as i32 + 1,
                }
            })
            .collect())
    }

    async fn indexes(
        &self,
        db: &dyn DatabaseHandle,
        _namespace: &str,
        table: &str,
    ) -> Result<Vec<RawIndex>> {
        let list = db
            .query(
                "SELECT il.name, il.\"unique\", il.origin, il.partial, m.sql \
                 FROM pragma_index_list(?) il \
                 LEFT JOIN sqlite_master m ON m.type = 'index' AND m.name = il.name \
                 ORDER BY il.name",
                &[SqlValue::from(table)],
            )
            .await?;

        let mut indexes = Vec::new();
        for entry in list {
            if entry.get_str("origin").as_deref() == Some("pk") {
                continue;
            }
            let Some(name) = entry.get_str("name") else {
                continue;
            };
            let sql = entry.get_str("sql");
            let parsed = sql.as_deref().and_then(parse_index_sql);

            let info = db
                .query(
                    "SELECT seqno, cid, name FROM pragma_index_info(?) ORDER BY seqno",
                    &[SqlValue::from(name.as_str())],
                )
                .await?;

            let mut parts = Vec::with_capacity(info.len());
            for (pos, col) in info.iter().enumerate() {
                match (col.get_i64("cid"), col.get_str("name")) {
                    (Some(cid), Some(column)) if cid >= 0 => parts.push(IndexPart::Column(column)),
                    (Some(-1), _) => parts.push(IndexPart::Column("rowid".to_string())),
                    _ => {
                        let expr = parsed
                            .as_ref()
                            .and_then(|(terms, _)| terms.get(pos).cloned())
                            .unwrap_or_else(|| "?".to_string());
                        parts.push(IndexPart::Expression(expr));
                    }
                }
            }

            let predicate = if entry.get_i64("partial").unwrap_or(0) == 1 {
                parsed.as_ref().and_then(|(_, pred)| pred.clone())
            } else {
                None
            };

            indexes.push(RawIndex {
                name,
                is_unique: entry.get_i64("unique").unwrap_or(0) == 1,
                parts,
                predicate,
                method: None,
                include: Vec::new(),
            });
        }
        Ok(indexes)
    }

    async fn foreign_keys(
        &self,
        db: &dyn DatabaseHandle,
        _namespace: &str,
        table: &str,
    ) -> Result<Vec<RawForeignKey>> {
        let rows = db
            .query(
                "SELECT id, seq, \"table\", \"from\", \"to\", on_update, on_delete \
                 FROM pragma_foreign_key_list(?) ORDER BY id, seq",
                &[SqlValue::from(table)],
            )
            .await?;

        let mut grouped: BTreeMap<i64, RawForeignKey> = BTreeMap::new();
        for row in rows {
            let id = row.get_i64("id").unwrap_or(0);
            let fk = grouped.entry(id).or_insert_with(|| RawForeignKey {
                name: None,
                columns: Vec::new(),
                ref_schema: None,
                ref_table: row.get_str("table").unwrap_or_default(),
                ref_columns: Vec::new(),
                on_delete: row.get_str("on_delete").unwrap_or_default(),
                on_update: row.get_str("on_update").unwrap_or_default(),
                deferrable: false,
                initially_deferred: false,
            });
            if let Some(from) = row.get_str("from") {
                fk.columns.push(from);
            }
            // A NULL "to" means the parent's primary key.
            if let Some(to) = row.get_str("to") {
                fk.ref_columns.push(to);
            }
        }

        Ok(grouped.into_values().collect())
    }
}

/// SELECT body of a `CREATE VIEW` statement.
fn view_body(sql: &str) -> Option<String> {
    VIEW_BODY
        .captures(sql)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Key terms and WHERE predicate of a `CREATE INDEX` statement.
fn parse_index_sql(sql: &str) -> Option<(Vec<String>, Option<String>)> {
    let upper = sql.to_ascii_uppercase();
    let on = upper.find(" ON ")?;
    let open = on + sql[on..].find('(')?;

    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    let mut close = None;
    let mut terms = Vec::new();
    let mut start = open + 1;
    for (i, ch) in sql[open..].char_indices().map(|(i, c)| (i + open, c)) {
        match (ch, in_quote) {
            ('\'' | '"', None) => in_quote = Some(ch),
            (q, Some(open_q)) if q == open_q => in_quote = None,
            (_, Some(_)) => {}
            ('(', None) => depth += 1,
            (')', None) => {
                depth -= 1;
                if depth == 0 {
                    terms.push(sql[start..i].trim().to_string());
                    close = Some(i);
                    break;
                }
            }
            (',', None) if depth == 1 => {
                terms.push(sql[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    let close = close?;

    let rest = sql[close + 1..].trim().trim_end_matches(';').trim();
    let predicate = rest
        .get(..5)
        .filter(|kw| kw.eq_ignore_ascii_case("WHERE"))
        .map(|_| rest[5..].trim().to_string());

    Some((terms, predicate))
}

//! DDL rendering for the target dialect.

use crate::core::capability::{Capabilities, DialectKind};
use crate::core::schema::{Column, DefaultValue, ForeignKey, Index, IndexPart, ReferentialAction, Table};
use crate::core::traits::Dialect;
use crate::dialect::CanonicalType;
use crate::drivers::DialectImpl;

/// Renders statements for one target namespace.
#[derive(Debug, Clone)]
pub(crate) struct DdlWriter {
    dialect: DialectImpl,
    source: DialectKind,
    namespace: String,
}

impl DdlWriter {
    pub fn new(target: DialectKind, source: DialectKind, namespace: impl Into<String>) -> Self {
        Self {
            dialect: DialectImpl::for_kind(target),
            source,
            namespace: namespace.into(),
        }
    }

    pub fn target(&self) -> DialectKind {
        self.dialect.kind()
    }

    pub fn caps(&self) -> &'static Capabilities {
        self.target().capabilities()
    }

    pub fn same_dialect(&self) -> bool {
        self.source == self.target()
    }

    pub fn quote(&self, ident: &str) -> String {
        self.dialect.quote_ident(ident)
    }

    pub fn table_ref(&self, name: &str) -> String {
        self.dialect.qualify(&self.namespace, name)
    }

    pub fn create_schema(&self) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", self.quote(&self.namespace))
    }

    /// Native type for a column. Unknown types keep their native spelling
    /// when source and target are the same engine.
    pub fn column_type(&self, table: &str, col: &Column, warnings: &mut Vec<String>) -> String {
        if col.unmapped_type {
            if self.same_dialect() {
                return col.native_type.clone();
            }
            warnings.push(format!(
                "{}.{}: unmapped type '{}' created as text",
                table, col.name, col.native_type
            ));
        }
        let mapping = self.dialect.type_mapper().from_canonical(&col.canonical_type);
        if let Some(w) = mapping.warning {
            warnings.push(format!("{}.{}: {}", table, col.name, w));
        }
        mapping.target_type
    }

    /// Single-column integer primary key written as SQLite's rowid alias.
    fn is_rowid_alias(&self, table: &Table, col: &Column) -> bool {
        self.target() == DialectKind::Sqlite
            && table.primary_key.len() == 1
            && table.primary_key[0] == col.name
            && col.canonical_type.is_integer()
    }

    fn is_identity(&self, col: &Column) -> bool {
        self.caps().identity_columns && col.is_auto_increment && col.canonical_type.is_integer()
    }

    /// The column that receives a post-load sequence reset, if any.
    pub fn identity_column<'t>(&self, table: &'t Table) -> Option<&'t Column> {
        table.columns.iter().find(|c| self.is_identity(c))
    }

    fn column_def(
        &self,
        table: &Table,
        col: &Column,
        in_create: bool,
        warnings: &mut Vec<String>,
    ) -> String {
        let name = self.quote(&col.name);
        if in_create && self.is_rowid_alias(table, col) {
            return format!("{} INTEGER PRIMARY KEY", name);
        }

        let mut def = format!("{} {}", name, self.column_type(&table.name, col, warnings));
        if self.is_identity(col) {
            def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
        } else if let Some(default) = self.default_sql(&table.name, col, warnings) {
            def.push_str(" DEFAULT ");
            def.push_str(&default);
        }
        if !col.is_nullable {
            def.push_str(" NOT NULL");
        }
        def
    }

    /// Render a column default. Engine-specific expressions survive only
    /// when the target is the engine they came from.
    pub fn default_sql(&self, table: &str, col: &Column, warnings: &mut Vec<String>) -> Option<String> {
        let default = col.default.as_ref()?;
        Some(match default {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Boolean(b) => {
                if col.canonical_type == CanonicalType::Boolean {
                    self.dialect.bool_literal(*b).to_string()
                } else {
                    (if *b { "1" } else { "0" }).to_string()
                }
            }
            DefaultValue::Number(n) => n.clone(),
            DefaultValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
            DefaultValue::CurrentDate => "CURRENT_DATE".to_string(),
            DefaultValue::CurrentTime => "CURRENT_TIME".to_string(),
            DefaultValue::Raw { expression, dialect } => {
                if *dialect != self.target() {
                    warnings.push(format!(
                        "{}.{}: {} default '{}' has no {} equivalent and was dropped",
                        table,
                        col.name,
                        dialect,
                        expression,
                        self.target()
                    ));
                    return None;
                }
                format!("({})", expression)
            }
        })
    }

    /// `CREATE TABLE` with primary key and the foreign keys `keep_fk` accepts.
    pub fn create_table(
        &self,
        table: &Table,
        keep_fk: impl Fn(&ForeignKey) -> bool,
        warnings: &mut Vec<String>,
    ) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("    {}", self.column_def(table, c, true, warnings)))
            .collect();

        let inline_pk = table
            .columns
            .iter()
            .any(|c| self.is_rowid_alias(table, c));
        if !table.primary_key.is_empty() && !inline_pk {
            parts.push(format!("    PRIMARY KEY ({})", self.column_list(&table.primary_key)));
        }
        for fk in table.foreign_keys.iter().filter(|fk| keep_fk(fk)) {
            parts.push(format!(
                "    CONSTRAINT {} {}",
                self.quote(&fk.name),
                self.foreign_key_clause(fk)
            ));
        }

        format!(
            "CREATE TABLE {} (\n{}\n)",
            self.table_ref(&table.name),
            parts.join(",\n")
        )
    }

    fn foreign_key_clause(&self, fk: &ForeignKey) -> String {
        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.column_list(&fk.columns),
            self.table_ref(&fk.ref_table),
            self.column_list(&fk.ref_columns)
        );
        if fk.on_delete != ReferentialAction::NoAction {
            sql.push_str(&format!(" ON DELETE {}", fk.on_delete.as_sql()));
        }
        if fk.on_update != ReferentialAction::NoAction {
            sql.push_str(&format!(" ON UPDATE {}", fk.on_update.as_sql()));
        }
        if fk.deferrable && self.caps().deferrable_constraints {
            sql.push_str(if fk.initially_deferred {
                " DEFERRABLE INITIALLY DEFERRED"
            } else {
                " DEFERRABLE INITIALLY IMMEDIATE"
            });
        }
        sql
    }

    pub fn add_foreign_key(&self, table: &str, fk: &ForeignKey) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            self.table_ref(table),
            self.quote(&fk.name),
            self.foreign_key_clause(fk)
        )
    }

    pub fn add_primary_key(&self, table: &str, columns: &[String]) -> String {
        format!(
            "ALTER TABLE {} ADD PRIMARY KEY ({})",
            self.table_ref(table),
            self.column_list(columns)
        )
    }

    pub fn add_column(&self, table: &Table, col: &Column, warnings: &mut Vec<String>) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table_ref(&table.name),
            self.column_def(table, col, false, warnings)
        )
    }

    pub fn alter_column_type(&self, table: &str, col: &Column, warnings: &mut Vec<String>) -> String {
        let ty = self.column_type(table, col, warnings);
        let name = self.quote(&col.name);
        format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
            self.table_ref(table),
            name,
            ty,
            name,
            ty
        )
    }

    pub fn alter_nullability(&self, table: &str, column: &str, nullable: bool) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
            self.table_ref(table),
            self.quote(column),
            if nullable { "DROP" } else { "SET" }
        )
    }

    pub fn alter_default(&self, table: &str, column: &str, default: Option<&str>) -> String {
        let action = match default {
            Some(d) => format!("SET DEFAULT {}", d),
            None => "DROP DEFAULT".to_string(),
        };
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            self.table_ref(table),
            self.quote(column),
            action
        )
    }

    pub fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE {}", self.table_ref(name))
    }

    pub fn drop_view(&self, name: &str, materialized: bool) -> String {
        if materialized && self.caps().materialized_views {
            format!("DROP MATERIALIZED VIEW {}", self.table_ref(name))
        } else {
            format!("DROP VIEW {}", self.table_ref(name))
        }
    }

    pub fn delete_all(&self, name: &str) -> String {
        format!("DELETE FROM {}", self.table_ref(name))
    }

    pub fn create_view(&self, name: &str, definition: &str, materialized: bool, populated: bool) -> String {
        if materialized {
            format!(
                "CREATE MATERIALIZED VIEW {} AS {}{}",
                self.table_ref(name),
                definition,
                if populated { "" } else { " WITH NO DATA" }
            )
        } else {
            format!("CREATE VIEW {} AS {}", self.table_ref(name), definition)
        }
    }

    /// Move an identity sequence past the copied keys.
    pub fn reset_identity(&self, table: &str, column: &str) -> String {
        let table_ref = self.table_ref(table);
        format!(
            "SELECT setval(pg_get_serial_sequence('{}', '{}'), COALESCE(MAX({}), 0) + 1, false) FROM {}",
            table_ref.replace('\'', "''"),
            column.replace('\'', "''"),
            self.quote(column),
            table_ref
        )
    }

    /// Target name for an index. SQLite reserves the `sqlite_` prefix for
    /// its automatic indexes.
    pub fn index_name(&self, table: &str, index: &Index) -> String {
        if !index.name.to_ascii_lowercase().starts_with("sqlite_") {
            return index.name.clone();
        }
        let cols: Vec<String> = index
            .parts
            .iter()
            .map(|p| match p {
                IndexPart::Column(c) => c.clone(),
                IndexPart::Expression(_) => "expr".to_string(),
            })
            .collect();
        let suffix = if index.is_unique { "key" } else { "idx" };
        cap_identifier(format!("{}_{}_{}", table, cols.join("_"), suffix))
    }

    /// `CREATE INDEX`, or `None` with a warning when the index is written in
    /// another engine's SQL.
    pub fn create_index(
        &self,
        table: &str,
        index: &Index,
        name: &str,
        warnings: &mut Vec<String>,
    ) -> Option<String> {
        if !self.same_dialect() && (index.has_expressions() || index.predicate.is_some()) {
            warnings.push(format!(
                "{}: index '{}' uses {} expressions and was not created",
                table, index.name, self.source
            ));
            return None;
        }

        let parts = index
            .parts
            .iter()
            .map(|p| match p {
                IndexPart::Column(c) => self.quote(c),
                IndexPart::Expression(e) => e.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "CREATE {}INDEX {} ON {}",
            if index.is_unique { "UNIQUE " } else { "" },
            self.quote(name),
            self.table_ref(table)
        );
        if let Some(method) = &index.method {
            if self.same_dialect() && !method.eq_ignore_ascii_case("btree") {
                sql.push_str(&format!(" USING {}", method));
            }
        }
        sql.push_str(&format!(" ({})", parts));
        if !index.include.is_empty() {
            if self.target() == DialectKind::Postgres {
                sql.push_str(&format!(" INCLUDE ({})", self.column_list(&index.include)));
            } else {
                warnings.push(format!(
                    "{}: index '{}' covering columns dropped",
                    table, index.name
                ));
            }
        }
        if let Some(predicate) = &index.predicate {
            sql.push_str(&format!(" WHERE {}", predicate));
        }
        Some(sql)
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// PostgreSQL truncates identifiers at 63 bytes.
pub(crate) fn cap_identifier(mut name: String) -> String {
    if name.len() > 63 {
        let mut end = 63;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_users() -> Table {
        let mut id = Column::new("id", CanonicalType::Integer);
        id.is_primary_key = true;
        id.is_nullable = false;
        id.is_auto_increment = true;
        let mut active = Column::new("active", CanonicalType::Boolean);
        active.default = Some(DefaultValue::Boolean(true));
        let mut created = Column::new("created_at", CanonicalType::Timestamp);
        created.default = Some(DefaultValue::CurrentTimestamp);
        let mut table = Table::new("main", "users");
        table.columns = vec![id, Column::new("email", CanonicalType::Text), active, created];
        table.primary_key = vec!["id".into()];
        table
    }

    #[test]
    fn test_create_table_postgres_identity() {
        let ddl = DdlWriter::new(DialectKind::Postgres, DialectKind::Sqlite, "public");
        let mut warnings = Vec::new();
        let sql = ddl.create_table(&make_test_users(), |_| true, &mut warnings);
        assert_eq!(
            sql,
            "CREATE TABLE \"public\".\"users\" (\n    \"id\" integer GENERATED BY DEFAULT AS IDENTITY NOT NULL,\n    \"email\" text,\n    \"active\" boolean DEFAULT TRUE,\n    \"created_at\" timestamp DEFAULT CURRENT_TIMESTAMP,\n    PRIMARY KEY (\"id\")\n)"
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_create_table_sqlite_rowid_alias() {
        let ddl = DdlWriter::new(DialectKind::Sqlite, DialectKind::Postgres, "main");
        let mut warnings = Vec::new();
        let sql = ddl.create_table(&make_test_users(), |_| true, &mut warnings);
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY,"));
        assert!(sql.contains("\"active\" BOOLEAN DEFAULT 1"));
        assert!(!sql.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn test_raw_default_only_for_same_dialect() {
        let mut col = Column::new("token", CanonicalType::Uuid);
        col.default = Some(DefaultValue::Raw {
            expression: "gen_random_uuid()".into(),
            dialect: DialectKind::Postgres,
        });

        let mut warnings = Vec::new();
        let pg = DdlWriter::new(DialectKind::Postgres, DialectKind::Postgres, "public");
        assert_eq!(
            pg.default_sql("t", &col, &mut warnings).as_deref(),
            Some("(gen_random_uuid())")
        );
        assert!(warnings.is_empty());

        let lite = DdlWriter::new(DialectKind::Sqlite, DialectKind::Postgres, "main");
        assert_eq!(lite.default_sql("t", &col, &mut warnings), None);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("t.token"));
    }

    #[test]
    fn test_array_column_to_sqlite_warns() {
        let ddl = DdlWriter::new(DialectKind::Sqlite, DialectKind::Postgres, "main");
        let col = Column::new("tags", CanonicalType::Array(Box::new(CanonicalType::Text)));
        let mut warnings = Vec::new();
        assert_eq!(ddl.column_type("posts", &col, &mut warnings), "TEXT");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("posts.tags:"));
    }

    #[test]
    fn test_unmapped_type_kept_for_same_dialect() {
        let mut col = Column::new("geom", CanonicalType::Text);
        col.unmapped_type = true;
        col.native_type = "geometry".into();
        let mut warnings = Vec::new();
        let same = DdlWriter::new(DialectKind::Postgres, DialectKind::Postgres, "public");
        assert_eq!(same.column_type("t", &col, &mut warnings), "geometry");
        let cross = DdlWriter::new(DialectKind::Sqlite, DialectKind::Postgres, "main");
        assert_eq!(cross.column_type("t", &col, &mut warnings), "TEXT");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_foreign_key_clause() {
        let ddl = DdlWriter::new(DialectKind::Postgres, DialectKind::Sqlite, "public");
        let fk = ForeignKey {
            name: "fk_orders_user_id".into(),
            columns: vec!["user_id".into()],
            ref_table: "users".into(),
            ref_schema: "main".into(),
            ref_columns: vec!["id".into()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
            deferrable: true,
            initially_deferred: true,
        };
        assert_eq!(
            ddl.add_foreign_key("orders", &fk),
            "ALTER TABLE \"public\".\"orders\" ADD CONSTRAINT \"fk_orders_user_id\" FOREIGN KEY (\"user_id\") REFERENCES \"public\".\"users\" (\"id\") ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED"
        );
    }

    #[test]
    fn test_sqlite_autoindex_is_renamed() {
        let ddl = DdlWriter::new(DialectKind::Postgres, DialectKind::Sqlite, "public");
        let idx = Index::on_columns("sqlite_autoindex_users_1", &["email"], true);
        let name = ddl.index_name("users", &idx);
        assert_eq!(name, "users_email_key");
        let mut warnings = Vec::new();
        assert_eq!(
            ddl.create_index("users", &idx, &name, &mut warnings).as_deref(),
            Some("CREATE UNIQUE INDEX \"users_email_key\" ON \"public\".\"users\" (\"email\")")
        );
    }

    #[test]
    fn test_cross_dialect_partial_index_skipped() {
        let ddl = DdlWriter::new(DialectKind::Postgres, DialectKind::Sqlite, "public");
        let mut idx = Index::on_columns("idx_active", &["email"], false);
        idx.predicate = Some("active = 1".into());
        let mut warnings = Vec::new();
        assert_eq!(ddl.create_index("users", &idx, "idx_active", &mut warnings), None);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_reset_identity() {
        let ddl = DdlWriter::new(DialectKind::Postgres, DialectKind::Sqlite, "public");
        assert_eq!(
            ddl.reset_identity("users", "id"),
            "SELECT setval(pg_get_serial_sequence('\"public\".\"users\"', 'id'), COALESCE(MAX(\"id\"), 0) + 1, false) FROM \"public\".\"users\""
        );
    }
}

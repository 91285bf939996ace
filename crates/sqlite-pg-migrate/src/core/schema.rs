//! Canonical schema model: tables, columns, indexes, foreign keys and the
//! relationships derived from them.
//!
//! A [`SchemaModel`] is produced by one discovery call and is never mutated
//! afterwards; re-discovery produces a new model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::capability::DialectKind;
use crate::dialect::CanonicalType;

/// Complete structural description of one database namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    /// Dialect the model was discovered from.
    pub dialect: DialectKind,

    /// Namespace (schema) that was introspected.
    pub namespace: String,

    /// Tables and views, in catalog order.
    pub tables: Vec<Table>,

    /// Relationships inferred from foreign keys.
    pub relationships: Vec<Relationship>,

    /// When discovery finished.
    pub discovered_at: DateTime<Utc>,

    /// Non-fatal problems met during discovery.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SchemaModel {
    /// Empty model for a dialect.
    pub fn empty(dialect: DialectKind, namespace: impl Into<String>) -> Self {
        Self {
            dialect,
            namespace: namespace.into(),
            tables: Vec::new(),
            relationships: Vec::new(),
            discovered_at: Utc::now(),
            warnings: Vec::new(),
        }
    }

    /// Look up a table or view by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Base tables only.
    pub fn base_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().filter(|t| !t.is_view)
    }

    /// Views only.
    pub fn views(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().filter(|t| t.is_view)
    }
}

/// Table or view metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions, in ordinal order.
    pub columns: Vec<Column>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Secondary indexes, including those backing unique constraints.
    pub indexes: Vec<Index>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,

    /// True for views and materialized views.
    #[serde(default)]
    pub is_view: bool,

    /// Present only for views.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewInfo>,

    /// Catalog row estimate, when the engine keeps one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_rows: Option<i64>,
}

impl Table {
    /// Create an empty base table.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            is_view: false,
            view: None,
            estimated_rows: None,
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in ordinal order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// The single integer primary key column, if that is what the table has.
    /// Such tables are paged by key instead of by offset.
    pub fn integer_pk(&self) -> Option<&Column> {
        if self.primary_key.len() != 1 {
            return None;
        }
        self.column(&self.primary_key[0])
            .filter(|c| c.canonical_type.is_integer())
    }

    /// Tables this table references, excluding itself.
    pub fn referenced_tables(&self) -> BTreeSet<&str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.ref_table.as_str())
            .filter(|t| *t != self.name)
            .collect()
    }

    /// Whether `columns` exactly match the primary key or a unique index.
    pub fn is_unique_key(&self, columns: &[String]) -> bool {
        if !self.primary_key.is_empty() && self.primary_key == columns {
            return true;
        }
        self.indexes.iter().any(|idx| {
            idx.is_unique
                && idx.predicate.is_none()
                && idx.column_names().as_deref() == Some(columns)
        })
    }
}

/// View-specific metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewInfo {
    /// SELECT body in the originating dialect.
    pub definition: Option<String>,

    /// Dialect the definition is written in.
    pub dialect: DialectKind,

    /// Materialized view (PostgreSQL).
    pub materialized: bool,

    /// Whether a materialized view has been populated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populated: Option<bool>,
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Canonical type.
    pub canonical_type: CanonicalType,

    /// Type exactly as the engine reported it.
    pub native_type: String,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Default value, normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,

    /// Member of the primary key.
    #[serde(default)]
    pub is_primary_key: bool,

    /// Identity, serial or rowid-alias column.
    #[serde(default)]
    pub is_auto_increment: bool,

    /// The declared type is only an affinity hint (SQLite); values of any
    /// type may be stored.
    #[serde(default)]
    pub type_advisory: bool,

    /// The native type was not recognised and mapped to text.
    #[serde(default)]
    pub unmapped_type: bool,

    /// 1-based position.
    pub ordinal_pos: i32,
}

impl Column {
    /// Nullable column with no default.
    pub fn new(name: impl Into<String>, canonical_type: CanonicalType) -> Self {
        Self {
            name: name.into(),
            native_type: canonical_type.to_string(),
            canonical_type,
            is_nullable: true,
            default: None,
            is_primary_key: false,
            is_auto_increment: false,
            type_advisory: false,
            unmapped_type: false,
            ordinal_pos: 0,
        }
    }
}

/// Column default, kept dialect-agnostic where possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
    Null,
    Boolean(bool),
    /// Numeric literal, kept as written.
    Number(String),
    /// String literal, unquoted.
    String(String),
    CurrentTimestamp,
    CurrentDate,
    CurrentTime,
    /// Engine-specific expression that could not be normalized.
    Raw {
        expression: String,
        dialect: DialectKind,
    },
}

impl DefaultValue {
    /// Parse a default spelled the same way in both dialects: NULL, a quoted
    /// string, a number, TRUE/FALSE or one of the CURRENT_* keywords.
    /// Redundant outer parentheses are ignored.
    pub fn parse_portable(expr: &str) -> Option<Self> {
        let expr = strip_outer_parens(expr.trim());
        let upper = expr.to_uppercase();
        match upper.as_str() {
            "NULL" => return Some(DefaultValue::Null),
            "TRUE" => return Some(DefaultValue::Boolean(true)),
            "FALSE" => return Some(DefaultValue::Boolean(false)),
            "CURRENT_TIMESTAMP" => return Some(DefaultValue::CurrentTimestamp),
            "CURRENT_DATE" => return Some(DefaultValue::CurrentDate),
            "CURRENT_TIME" => return Some(DefaultValue::CurrentTime),
            _ => {}
        }
        if let Some(s) = unquote_literal(expr) {
            return Some(DefaultValue::String(s));
        }
        if is_numeric_literal(expr) {
            return Some(DefaultValue::Number(expr.to_string()));
        }
        None
    }
}

/// Remove parentheses wrapping the whole expression, e.g. `((0))` → `0`.
pub(crate) fn strip_outer_parens(mut expr: &str) -> &str {
    loop {
        let trimmed = expr.trim();
        if !(trimmed.starts_with('(') && trimmed.ends_with(')')) {
            return trimmed;
        }
        // Only strip when the first paren closes at the very end.
        let mut depth = 0i32;
        let mut in_quote = false;
        for (i, ch) in trimmed.char_indices() {
            match ch {
                '\'' => in_quote = !in_quote,
                '(' if !in_quote => depth += 1,
                ')' if !in_quote => {
                    depth -= 1;
                    if depth == 0 && i != trimmed.len() - 1 {
                        return trimmed;
                    }
                }
                _ => {}
            }
        }
        expr = &trimmed[1..trimmed.len() - 1];
    }
}

/// Content of a single-quoted SQL literal, with `''` unescaped.
pub(crate) fn unquote_literal(expr: &str) -> Option<String> {
    let inner = expr.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\'' {
            // A lone quote means this was more than one literal.
            if chars.next() != Some('\'') {
                return None;
            }
        }
        out.push(ch);
    }
    Some(out)
}

/// Whether `expr` is a plain decimal or scientific number.
pub(crate) fn is_numeric_literal(expr: &str) -> bool {
    let body = expr.strip_prefix(['+', '-']).unwrap_or(expr);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };
    let mut parts = mantissa.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next();
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    let mantissa_ok = digits(int_part)
        && frac_part.map_or(true, digits)
        && !(int_part.is_empty() && frac_part.map_or(true, str::is_empty));
    let exponent_ok = exponent.map_or(true, |e| {
        let e = e.strip_prefix(['+', '-']).unwrap_or(e);
        !e.is_empty() && digits(e)
    });
    mantissa_ok && exponent_ok
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Key parts in order.
    pub parts: Vec<IndexPart>,

    /// Whether the index is unique.
    pub is_unique: bool,

    /// WHERE clause of a partial index, in the originating dialect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,

    /// Access method hint (btree, gin, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Covering (INCLUDE) columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
}

impl Index {
    /// Plain b-tree index over columns.
    pub fn on_columns(name: impl Into<String>, columns: &[&str], is_unique: bool) -> Self {
        Self {
            name: name.into(),
            parts: columns
                .iter()
                .map(|c| IndexPart::Column(c.to_string()))
                .collect(),
            is_unique,
            predicate: None,
            method: None,
            include: Vec::new(),
        }
    }

    /// Column names if every part is a plain column.
    pub fn column_names(&self) -> Option<Vec<String>> {
        self.parts
            .iter()
            .map(|p| match p {
                IndexPart::Column(c) => Some(c.clone()),
                IndexPart::Expression(_) => None,
            })
            .collect()
    }

    /// Whether any part is an expression.
    pub fn has_expressions(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, IndexPart::Expression(_)))
    }
}

/// One key part of an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPart {
    Column(String),
    Expression(String),
}

impl std::fmt::Display for IndexPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexPart::Column(c) => write!(f, "{}", c),
            IndexPart::Expression(e) => write!(f, "({})", e),
        }
    }
}

/// Foreign key constraint metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name (generated for engines that do not name them).
    pub name: String,

    /// Local column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced schema name.
    pub ref_schema: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: ReferentialAction,

    /// ON UPDATE action.
    pub on_update: ReferentialAction,

    /// DEFERRABLE.
    #[serde(default)]
    pub deferrable: bool,

    /// INITIALLY DEFERRED.
    #[serde(default)]
    pub initially_deferred: bool,
}

impl ForeignKey {
    /// Whether two keys describe the same constraint, ignoring names.
    pub fn same_definition(&self, other: &ForeignKey) -> bool {
        self.columns == other.columns
            && self.ref_table == other.ref_table
            && self.ref_columns == other.ref_columns
            && self.on_delete == other.on_delete
            && self.on_update == other.on_update
    }
}

/// Referential action. An unspecified action is stored as `NoAction`, which
/// is what both engines apply by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Parse the spelling used by `pragma_foreign_key_list` and DDL.
    pub fn from_sql(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "CASCADE" => ReferentialAction::Cascade,
            "SET NULL" => ReferentialAction::SetNull,
            "SET DEFAULT" => ReferentialAction::SetDefault,
            "RESTRICT" => ReferentialAction::Restrict,
            _ => ReferentialAction::NoAction,
        }
    }

    /// Parse a `pg_constraint.confdeltype` / `confupdtype` code.
    pub fn from_pg_code(code: &str) -> Self {
        match code {
            "c" => ReferentialAction::Cascade,
            "n" => ReferentialAction::SetNull,
            "d" => ReferentialAction::SetDefault,
            "r" => ReferentialAction::Restrict,
            _ => ReferentialAction::NoAction,
        }
    }

    /// SQL spelling.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Relationship between two tables, inferred from a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Name of the underlying foreign key.
    pub name: String,
    pub from_table: String,
    pub from_columns: Vec<String>,
    pub to_table: String,
    pub to_columns: Vec<String>,
    pub cardinality: Cardinality,
}

/// Cardinality seen from the referencing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ManyToOne,
    OneToOne,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_table() -> Table {
        let mut id = Column::new("id", CanonicalType::BigInt);
        id.is_primary_key = true;
        id.is_nullable = false;
        let mut table = Table::new("public", "users");
        table.columns = vec![id, Column::new("email", CanonicalType::Text)];
        table.primary_key = vec!["id".to_string()];
        table.indexes = vec![Index::on_columns("users_email_key", &["email"], true)];
        table
    }

    #[test]
    fn test_unique_key_detection() {
        let table = make_test_table();
        assert!(table.is_unique_key(&["id".to_string()]));
        assert!(table.is_unique_key(&["email".to_string()]));
        assert!(!table.is_unique_key(&["id".to_string(), "email".to_string()]));
    }

    #[test]
    fn test_integer_pk() {
        let table = make_test_table();
        assert_eq!(table.integer_pk().map(|c| c.name.as_str()), Some("id"));
    }

    #[test]
    fn test_foreign_key_definition_ignores_name() {
        let fk = ForeignKey {
            name: "a".into(),
            columns: vec!["user_id".into()],
            ref_table: "users".into(),
            ref_schema: "main".into(),
            ref_columns: vec!["id".into()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
            deferrable: false,
            initially_deferred: false,
        };
        let mut other = fk.clone();
        other.name = "fk_orders_user_id".into();
        other.ref_schema = "public".into();
        assert!(fk.same_definition(&other));
        other.on_delete = ReferentialAction::SetNull;
        assert!(!fk.same_definition(&other));
    }

    #[test]
    fn test_referential_action_parsing() {
        assert_eq!(ReferentialAction::from_sql("set null"), ReferentialAction::SetNull);
        assert_eq!(ReferentialAction::from_sql(""), ReferentialAction::NoAction);
        assert_eq!(ReferentialAction::from_pg_code("c"), ReferentialAction::Cascade);
        assert_eq!(ReferentialAction::from_pg_code("a"), ReferentialAction::NoAction);
    }

    #[test]
    fn test_parse_portable_default() {
        assert_eq!(DefaultValue::parse_portable("NULL"), Some(DefaultValue::Null));
        assert_eq!(
            DefaultValue::parse_portable("'it''s'"),
            Some(DefaultValue::String("it's".into()))
        );
        assert_eq!(
            DefaultValue::parse_portable("((-1.5e3))"),
            Some(DefaultValue::Number("-1.5e3".into()))
        );
        assert_eq!(
            DefaultValue::parse_portable("current_timestamp"),
            Some(DefaultValue::CurrentTimestamp)
        );
        assert_eq!(DefaultValue::parse_portable("'a' || 'b'"), None);
        assert_eq!(DefaultValue::parse_portable("(1) + (2)"), None);
        assert_eq!(DefaultValue::parse_portable("random()"), None);
        assert_eq!(DefaultValue::parse_portable("."), None);
    }

    #[test]
    fn test_default_value_serde() {
        let d = DefaultValue::Raw {
            expression: "gen_random_uuid()".into(),
            dialect: DialectKind::Postgres,
        };
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"kind\":\"raw\""));
        let back: DefaultValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}

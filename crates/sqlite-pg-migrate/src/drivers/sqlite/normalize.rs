//! SQLite raw metadata → canonical form.

use crate::core::capability::DialectKind;
use crate::core::schema::{strip_outer_parens, DefaultValue};
use crate::core::traits::{NormalizedDefault, Normalizer, RawColumn};
use crate::dialect::{SqliteToCanonical, ToCanonical};

/// SQLite normalizer.
#[derive(Debug, Clone, Default)]
pub struct SqliteNormalizer {
    converter: SqliteToCanonical,
}

impl SqliteNormalizer {
    /// Create a new SQLite normalizer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Normalizer for SqliteNormalizer {
    fn dialect(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn type_converter(&self) -> &dyn ToCanonical {
        &self.converter
    }

    fn normalize_default(&self, raw: &str) -> NormalizedDefault {
        let compact: String = strip_outer_parens(raw)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        let value = match compact.as_str() {
            "datetime('now')" | "datetime('now','utc')" => Some(DefaultValue::CurrentTimestamp),
            "date('now')" => Some(DefaultValue::CurrentDate),
            "time('now')" => Some(DefaultValue::CurrentTime),
            _ => DefaultValue::parse_portable(raw),
        }
        .unwrap_or_else(|| DefaultValue::Raw {
            expression: raw.trim().to_string(),
            dialect: DialectKind::Sqlite,
        });

        NormalizedDefault {
            value: Some(value),
            implies_auto_increment: false,
        }
    }

    /// A single-column `INTEGER` primary key is an alias of the rowid and is
    /// assigned automatically.
    fn is_auto_increment(&self, column: &RawColumn, pk_len: usize, _table_sql: Option<&str>) -> bool {
        pk_len == 1
            && column.pk_position.is_some()
            && column.native_type.trim().eq_ignore_ascii_case("INTEGER")
    }
}

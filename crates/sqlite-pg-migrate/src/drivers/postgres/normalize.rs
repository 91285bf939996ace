//! PostgreSQL raw metadata → canonical form.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::capability::DialectKind;
use crate::core::schema::{strip_outer_parens, DefaultValue};
use crate::core::traits::{NormalizedDefault, Normalizer, RawColumn};
use crate::dialect::{PostgresToCanonical, ToCanonical};

/// Trailing `::type` cast as printed by `pg_get_expr`, e.g.
/// `::character varying`, `::numeric(10,2)`, `::text[]`.
static TRAILING_CAST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)::\s*"?[a-z_][a-z0-9_ ]*"?(?:\(\s*\d+(?:\s*,\s*\d+)?\s*\))?(?:\[\])*\s*$"#)
        .expect("valid cast regex")
});

/// PostgreSQL normalizer.
#[derive(Debug, Clone, Default)]
pub struct PostgresNormalizer {
    converter: PostgresToCanonical,
}

impl PostgresNormalizer {
    /// Create a new PostgreSQL normalizer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Normalizer for PostgresNormalizer {
    fn dialect(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn type_converter(&self) -> &dyn ToCanonical {
        &self.converter
    }

    fn normalize_default(&self, raw: &str) -> NormalizedDefault {
        let trimmed = raw.trim();
        if trimmed.to_ascii_lowercase().starts_with("nextval(") {
            return NormalizedDefault {
                value: None,
                implies_auto_increment: true,
            };
        }

        let stripped = strip_casts(trimmed);
        let value = match stripped.to_ascii_lowercase().as_str() {
            "now()" | "current_timestamp" | "localtimestamp" | "transaction_timestamp()" => {
                Some(DefaultValue::CurrentTimestamp)
            }
            "current_date" => Some(DefaultValue::CurrentDate),
            "current_time" | "localtime" => Some(DefaultValue::CurrentTime),
            _ => DefaultValue::parse_portable(stripped).map(|v| match v {
                // '42'::numeric is a number, not a string.
                DefaultValue::String(s)
                    if stripped != trimmed
                        && is_numeric_cast(trimmed)
                        && s.parse::<f64>().is_ok() =>
                {
                    DefaultValue::Number(s)
                }
                other => other,
            }),
        }
        .unwrap_or_else(|| DefaultValue::Raw {
            expression: trimmed.to_string(),
            dialect: DialectKind::Postgres,
        });

        NormalizedDefault {
            value: Some(value),
            implies_auto_increment: false,
        }
    }

    fn is_auto_increment(&self, column: &RawColumn, _pk_len: usize, _table_sql: Option<&str>) -> bool {
        column.is_identity
    }
}

/// Remove trailing casts, including those inside redundant parentheses:
/// `('x'::text)::varchar` → `'x'`.
fn strip_casts(expr: &str) -> &str {
    let mut current = strip_outer_parens(expr);
    loop {
        match TRAILING_CAST.find(current) {
            Some(m) if !inside_quotes(current, m.start()) => {
                current = strip_outer_parens(&current[..m.start()]);
            }
            _ => return current,
        }
    }
}

fn inside_quotes(expr: &str, pos: usize) -> bool {
    expr[..pos].chars().filter(|&c| c == '\'').count() % 2 == 1
}

fn is_numeric_cast(expr: &str) -> bool {
    let lower = expr.to_ascii_lowercase();
    [
        "::numeric",
        "::integer",
        "::bigint",
        "::smallint",
        "::real",
        "::double precision",
    ]
    .iter()
    .any(|cast| lower.contains(cast))
}

//! Native ↔ canonical converters for the reference dialects.

use super::canonical::{
    split_type_params, CanonicalType, CanonicalTypeInfo, FromCanonical, ToCanonical, TypeMapping,
};
use crate::core::capability::DialectKind;

/// SQLite declared type → canonical.
///
/// SQLite accepts any declared type name and only derives an affinity from it,
/// so well-known spellings are matched first and the documented affinity rules
/// (contains "INT", "CHAR", "CLOB", "TEXT", "BLOB", "REAL", "FLOA", "DOUB")
/// are used for everything else.
#[derive(Debug, Clone, Default)]
pub struct SqliteToCanonical;

impl SqliteToCanonical {
    /// Create a new SQLite to canonical converter.
    pub fn new() -> Self {
        Self
    }
}

impl ToCanonical for SqliteToCanonical {
    fn dialect(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn to_canonical(
        &self,
        native: &str,
        _max_length: Option<u32>,
        _precision: Option<u32>,
        _scale: Option<u32>,
    ) -> CanonicalTypeInfo {
        let (base, params) = split_type_params(native);
        let base = base.to_uppercase();
        let first = params.first().copied();

        let exact = match base.as_str() {
            "BOOLEAN" | "BOOL" => Some(CanonicalType::Boolean),
            "TINYINT" | "SMALLINT" | "INT2" => Some(CanonicalType::SmallInt),
            "INTEGER" | "INT" | "MEDIUMINT" | "INT4" => Some(CanonicalType::Integer),
            "BIGINT" | "INT8" | "UNSIGNED BIG INT" => Some(CanonicalType::BigInt),
            "REAL" | "FLOAT4" => Some(CanonicalType::Real),
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "FLOAT8" => Some(CanonicalType::Double),
            "NUMERIC" | "DECIMAL" => Some(CanonicalType::Decimal {
                precision: first,
                scale: params.get(1).copied(),
            }),
            "CHAR" | "CHARACTER" | "NCHAR" | "NATIVE CHARACTER" => {
                Some(CanonicalType::Char(first))
            }
            "VARCHAR" | "CHARACTER VARYING" | "VARYING CHARACTER" | "NVARCHAR" => {
                Some(CanonicalType::Varchar(first))
            }
            "TEXT" | "CLOB" => Some(CanonicalType::Text),
            "BLOB" => Some(CanonicalType::Blob),
            "DATE" => Some(CanonicalType::Date),
            "TIME" => Some(CanonicalType::Time),
            "DATETIME" | "TIMESTAMP" => Some(CanonicalType::Timestamp),
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => Some(CanonicalType::TimestampTz),
            "UUID" => Some(CanonicalType::Uuid),
            "JSON" => Some(CanonicalType::Json),
            "JSONB" => Some(CanonicalType::Jsonb),
            _ => None,
        };
        if let Some(ty) = exact {
            return CanonicalTypeInfo::lossless(ty);
        }

        if base.is_empty() {
            return CanonicalTypeInfo::lossy(
                CanonicalType::Text,
                "Column has no declared type; treated as text",
            );
        }

        // Affinity rules, in the order SQLite applies them.
        if base.contains("INT") {
            CanonicalTypeInfo::lossless(CanonicalType::Integer)
        } else if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") {
            CanonicalTypeInfo::lossless(CanonicalType::Text)
        } else if base.contains("BLOB") {
            CanonicalTypeInfo::lossless(CanonicalType::Blob)
        } else if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") {
            CanonicalTypeInfo::lossless(CanonicalType::Double)
        } else {
            CanonicalTypeInfo::fallback(DialectKind::Sqlite, native)
        }
    }
}

/// Canonical → SQLite declared type.
#[derive(Debug, Clone, Default)]
pub struct SqliteFromCanonical;

impl SqliteFromCanonical {
    /// Create a new canonical to SQLite converter.
    pub fn new() -> Self {
        Self
    }
}

impl FromCanonical for SqliteFromCanonical {
    fn dialect(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        match canonical {
            CanonicalType::Boolean => TypeMapping::lossless("BOOLEAN"),
            CanonicalType::SmallInt => TypeMapping::lossless("SMALLINT"),
            CanonicalType::Integer => TypeMapping::lossless("INTEGER"),
            CanonicalType::BigInt => TypeMapping::lossless("BIGINT"),
            CanonicalType::Real => TypeMapping::lossless("REAL"),
            CanonicalType::Double => TypeMapping::lossless("DOUBLE"),
            CanonicalType::Decimal { precision, scale } => match (precision, scale) {
                (Some(p), Some(s)) => TypeMapping::lossless(format!("NUMERIC({},{})", p, s)),
                (Some(p), None) => TypeMapping::lossless(format!("NUMERIC({})", p)),
                _ => TypeMapping::lossless("NUMERIC"),
            },
            CanonicalType::Char(Some(n)) => TypeMapping::lossless(format!("CHAR({})", n)),
            CanonicalType::Char(None) => TypeMapping::lossless("CHAR"),
            CanonicalType::Varchar(Some(n)) => TypeMapping::lossless(format!("VARCHAR({})", n)),
            CanonicalType::Varchar(None) => TypeMapping::lossless("VARCHAR"),
            CanonicalType::Text => TypeMapping::lossless("TEXT"),
            CanonicalType::Blob => TypeMapping::lossless("BLOB"),
            CanonicalType::Date => TypeMapping::lossless("DATE"),
            CanonicalType::Time => TypeMapping::lossless("TIME"),
            CanonicalType::Timestamp => TypeMapping::lossless("TIMESTAMP"),
            CanonicalType::TimestampTz => TypeMapping::lossless("TIMESTAMPTZ"),
            CanonicalType::Uuid => TypeMapping::lossless("UUID"),
            CanonicalType::Json => TypeMapping::lossless("JSON"),
            CanonicalType::Jsonb => {
                TypeMapping::lossy("JSON", "jsonb stored as JSON text in SQLite")
            }
            CanonicalType::Interval => {
                TypeMapping::lossy("TEXT", "interval stored as its text form in SQLite")
            }
            CanonicalType::TextSearch => TypeMapping::lossy(
                "TEXT",
                "tsvector stored as text; full-text search is not carried over",
            ),
            CanonicalType::Array(inner) => TypeMapping::lossy(
                "TEXT",
                format!("{}[] stored as JSON array text (no native arrays)", inner),
            ),
        }
    }
}

/// PostgreSQL type → canonical.
///
/// Accepts both `udt_name` spellings (`int4`, `_text`) and SQL spellings
/// (`integer`, `text[]`).
#[derive(Debug, Clone, Default)]
pub struct PostgresToCanonical;

impl PostgresToCanonical {
    /// Create a new PostgreSQL to canonical converter.
    pub fn new() -> Self {
        Self
    }
}

impl ToCanonical for PostgresToCanonical {
    fn dialect(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn to_canonical(
        &self,
        native: &str,
        max_length: Option<u32>,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> CanonicalTypeInfo {
        let pg_lower = native.trim().to_lowercase();

        // Handle array types
        let element = pg_lower
            .strip_suffix("[]")
            .or_else(|| pg_lower.strip_prefix('_'));
        if let Some(base_type) = element {
            let inner = self.to_canonical(base_type, max_length, precision, scale);
            return CanonicalTypeInfo {
                canonical_type: CanonicalType::Array(Box::new(inner.canonical_type)),
                ..inner
            };
        }

        let (base, params) = split_type_params(&pg_lower);
        let max_length = max_length.or_else(|| params.first().copied());
        let precision = precision.or_else(|| params.first().copied());
        let scale = scale.or_else(|| params.get(1).copied());

        let ty = match base.as_str() {
            "bool" | "boolean" => CanonicalType::Boolean,
            "int2" | "smallint" | "smallserial" => CanonicalType::SmallInt,
            "int4" | "integer" | "int" | "serial" => CanonicalType::Integer,
            "int8" | "bigint" | "bigserial" | "oid" => CanonicalType::BigInt,
            "float4" | "real" => CanonicalType::Real,
            "float8" | "double precision" => CanonicalType::Double,
            "numeric" | "decimal" => CanonicalType::Decimal { precision, scale },
            "money" => {
                return CanonicalTypeInfo::lossy(
                    CanonicalType::Decimal {
                        precision: Some(19),
                        scale: Some(2),
                    },
                    "money mapped to decimal(19,2)",
                )
            }
            "bpchar" | "char" | "character" => CanonicalType::Char(max_length),
            "varchar" | "character varying" => CanonicalType::Varchar(max_length),
            "text" | "citext" => CanonicalType::Text,
            "name" => CanonicalType::Varchar(Some(63)),
            "bytea" => CanonicalType::Blob,
            "date" => CanonicalType::Date,
            "time" | "time without time zone" => CanonicalType::Time,
            "timetz" | "time with time zone" => {
                return CanonicalTypeInfo::lossy(
                    CanonicalType::Time,
                    "time with time zone loses its offset",
                )
            }
            "timestamp" | "timestamp without time zone" => CanonicalType::Timestamp,
            "timestamptz" | "timestamp with time zone" => CanonicalType::TimestampTz,
            "interval" => CanonicalType::Interval,
            "uuid" => CanonicalType::Uuid,
            "json" => CanonicalType::Json,
            "jsonb" => CanonicalType::Jsonb,
            "tsvector" => CanonicalType::TextSearch,
            _ => return CanonicalTypeInfo::fallback(DialectKind::Postgres, native),
        };
        CanonicalTypeInfo::lossless(ty)
    }
}

/// Canonical → PostgreSQL type.
#[derive(Debug, Clone, Default)]
pub struct PostgresFromCanonical;

impl PostgresFromCanonical {
    /// Create a new canonical to PostgreSQL converter.
    pub fn new() -> Self {
        Self
    }
}

impl FromCanonical for PostgresFromCanonical {
    fn dialect(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping {
        match canonical {
            CanonicalType::Boolean => TypeMapping::lossless("boolean"),
            CanonicalType::SmallInt => TypeMapping::lossless("smallint"),
            CanonicalType::Integer => TypeMapping::lossless("integer"),
            CanonicalType::BigInt => TypeMapping::lossless("bigint"),
            CanonicalType::Real => TypeMapping::lossless("real"),
            CanonicalType::Double => TypeMapping::lossless("double precision"),
            CanonicalType::Decimal { precision, scale } => match (precision, scale) {
                (Some(p), Some(s)) => TypeMapping::lossless(format!("numeric({},{})", p, s)),
                (Some(p), None) => TypeMapping::lossless(format!("numeric({})", p)),
                _ => TypeMapping::lossless("numeric"),
            },
            CanonicalType::Char(Some(n)) => TypeMapping::lossless(format!("char({})", n)),
            CanonicalType::Char(None) => TypeMapping::lossless("char(1)"),
            CanonicalType::Varchar(Some(n)) if *n <= 10_485_760 => {
                TypeMapping::lossless(format!("varchar({})", n))
            }
            CanonicalType::Varchar(_) => TypeMapping::lossless("varchar"),
            CanonicalType::Text => TypeMapping::lossless("text"),
            CanonicalType::Blob => TypeMapping::lossless("bytea"),
            CanonicalType::Date => TypeMapping::lossless("date"),
            CanonicalType::Time => TypeMapping::lossless("time"),
            CanonicalType::Timestamp => TypeMapping::lossless("timestamp"),
            CanonicalType::TimestampTz => TypeMapping::lossless("timestamptz"),
            CanonicalType::Interval => TypeMapping::lossless("interval"),
            CanonicalType::Uuid => TypeMapping::lossless("uuid"),
            CanonicalType::Json => TypeMapping::lossless("json"),
            CanonicalType::Jsonb => TypeMapping::lossless("jsonb"),
            CanonicalType::TextSearch => TypeMapping::lossless("tsvector"),
            CanonicalType::Array(inner) => {
                let inner_mapping = self.from_canonical(inner);
                TypeMapping {
                    target_type: format!("{}[]", inner_mapping.target_type),
                    is_lossy: inner_mapping.is_lossy,
                    warning: inner_mapping.warning,
                }
            }
        }
    }
}

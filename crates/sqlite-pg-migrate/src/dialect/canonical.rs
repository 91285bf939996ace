//! Hub-and-spoke canonical type system.
//!
//! Every engine's native type name is resolved into one closed vocabulary,
//! [`CanonicalType`], and rendered back out of it. Adding a dialect therefore
//! needs two converters:
//! - `ToCanonical`: native type → canonical type
//! - `FromCanonical`: canonical type → native type
//!
//! ```text
//! SQLite "VARCHAR(50)"  →  varchar(50)  →  PostgreSQL "varchar(50)"
//! PostgreSQL "_int4"    →  integer[]    →  SQLite "TEXT" (JSON, lossy)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::capability::DialectKind;
use crate::error::{MigrateError, Result};

/// Dialect-neutral column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CanonicalType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    /// Exact numeric. Both parts are optional because neither engine requires them.
    Decimal {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Char(Option<u32>),
    /// `None` means no declared limit.
    Varchar(Option<u32>),
    Text,
    Blob,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Uuid,
    Json,
    /// Binary JSON (PostgreSQL jsonb).
    Jsonb,
    /// Full-text vector pseudo-type (PostgreSQL tsvector).
    TextSearch,
    Array(Box<CanonicalType>),
}

impl CanonicalType {
    /// Integer family (including booleans stored as integers is not implied).
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            CanonicalType::SmallInt | CanonicalType::Integer | CanonicalType::BigInt
        )
    }

    /// Character family.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            CanonicalType::Char(_) | CanonicalType::Varchar(_) | CanonicalType::Text
        )
    }

    /// Declared maximum length for character types.
    pub fn max_length(&self) -> Option<u32> {
        match self {
            CanonicalType::Char(n) | CanonicalType::Varchar(n) => *n,
            _ => None,
        }
    }

    /// Declared precision for exact numerics.
    pub fn precision(&self) -> Option<u32> {
        match self {
            CanonicalType::Decimal { precision, .. } => *precision,
            _ => None,
        }
    }

    /// Whether every value of `self` can be stored in a column of type `other`
    /// without loss.
    pub fn fits_into(&self, other: &CanonicalType) -> bool {
        use CanonicalType::*;

        if self == other {
            return true;
        }
        match (self, other) {
            (SmallInt, Integer | BigInt) | (Integer, BigInt) => true,
            (SmallInt | Integer | BigInt, Decimal { scale, .. }) => scale.unwrap_or(0) == 0,
            (SmallInt | Integer, Double) => true,
            (Real, Double) => true,
            (Decimal { precision: p1, scale: s1 }, Decimal { precision: p2, scale: s2 }) => {
                match (p1, p2) {
                    (_, None) => true,
                    (None, Some(_)) => false,
                    (Some(p1), Some(p2)) => {
                        p1 <= p2 && s1.unwrap_or(0) <= s2.unwrap_or(0)
                    }
                }
            }
            (Char(a) | Varchar(a), Varchar(b)) => match (a, b) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(a), Some(b)) => a <= b,
            },
            (Char(_) | Varchar(_), Text) => true,
            (Uuid | Json | Jsonb | Date | Time | Timestamp | TimestampTz | TextSearch, Text) => {
                true
            }
            (Json, Jsonb) | (Jsonb, Json) => true,
            (Timestamp, TimestampTz) => true,
            (Array(a), Array(b)) => a.fits_into(b),
            (Array(_), Text | Json | Jsonb) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalType::Boolean => write!(f, "boolean"),
            CanonicalType::SmallInt => write!(f, "smallint"),
            CanonicalType::Integer => write!(f, "integer"),
            CanonicalType::BigInt => write!(f, "bigint"),
            CanonicalType::Real => write!(f, "real"),
            CanonicalType::Double => write!(f, "double"),
            CanonicalType::Decimal { precision, scale } => match (precision, scale) {
                (Some(p), Some(s)) => write!(f, "decimal({},{})", p, s),
                (Some(p), None) => write!(f, "decimal({})", p),
                _ => write!(f, "decimal"),
            },
            CanonicalType::Char(Some(n)) => write!(f, "char({})", n),
            CanonicalType::Char(None) => write!(f, "char"),
            CanonicalType::Varchar(Some(n)) => write!(f, "varchar({})", n),
            CanonicalType::Varchar(None) => write!(f, "varchar"),
            CanonicalType::Text => write!(f, "text"),
            CanonicalType::Blob => write!(f, "blob"),
            CanonicalType::Date => write!(f, "date"),
            CanonicalType::Time => write!(f, "time"),
            CanonicalType::Timestamp => write!(f, "timestamp"),
            CanonicalType::TimestampTz => write!(f, "timestamptz"),
            CanonicalType::Interval => write!(f, "interval"),
            CanonicalType::Uuid => write!(f, "uuid"),
            CanonicalType::Json => write!(f, "json"),
            CanonicalType::Jsonb => write!(f, "jsonb"),
            CanonicalType::TextSearch => write!(f, "tsvector"),
            CanonicalType::Array(inner) => write!(f, "{}[]", inner),
        }
    }
}

impl FromStr for CanonicalType {
    type Err = MigrateError;

    /// Parse the canonical spelling produced by `Display`. Used for
    /// `custom_type_mappings` overrides and serialized models.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        if let Some(inner) = s.strip_suffix("[]") {
            return Ok(CanonicalType::Array(Box::new(inner.parse()?)));
        }

        let (base, params) = split_type_params(&s);
        let first = params.first().copied();
        let ty = match base.as_str() {
            "boolean" | "bool" => CanonicalType::Boolean,
            "smallint" => CanonicalType::SmallInt,
            "integer" | "int" => CanonicalType::Integer,
            "bigint" => CanonicalType::BigInt,
            "real" | "float" => CanonicalType::Real,
            "double" => CanonicalType::Double,
            "decimal" | "numeric" => CanonicalType::Decimal {
                precision: first,
                scale: params.get(1).copied(),
            },
            "char" => CanonicalType::Char(first),
            "varchar" => CanonicalType::Varchar(first),
            "text" => CanonicalType::Text,
            "blob" => CanonicalType::Blob,
            "date" => CanonicalType::Date,
            "time" => CanonicalType::Time,
            "timestamp" => CanonicalType::Timestamp,
            "timestamptz" => CanonicalType::TimestampTz,
            "interval" => CanonicalType::Interval,
            "uuid" => CanonicalType::Uuid,
            "json" => CanonicalType::Json,
            "jsonb" => CanonicalType::Jsonb,
            "tsvector" => CanonicalType::TextSearch,
            _ => {
                return Err(MigrateError::Config(format!(
                    "'{}' is not a canonical type",
                    s
                )))
            }
        };
        Ok(ty)
    }
}

impl From<CanonicalType> for String {
    fn from(ty: CanonicalType) -> Self {
        ty.to_string()
    }
}

impl TryFrom<String> for CanonicalType {
    type Error = MigrateError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Split `"varchar(255)"` into `("varchar", [255])`. Non-numeric parameters are ignored.
pub fn split_type_params(native: &str) -> (String, Vec<u32>) {
    let native = native.trim();
    match native.find('(') {
        Some(open) => {
            let base = native[..open].trim().to_string();
            let close = native.rfind(')').unwrap_or(native.len());
            let params = native[open + 1..close.max(open + 1)]
                .split(',')
                .filter_map(|p| p.trim().parse::<u32>().ok())
                .collect();
            (base, params)
        }
        None => (native.to_string(), Vec::new()),
    }
}

/// Result of converting a native type to canonical form.
#[derive(Debug, Clone)]
pub struct CanonicalTypeInfo {
    /// The canonical type representation.
    pub canonical_type: CanonicalType,
    /// Whether information was lost in the conversion to canonical.
    pub is_lossy: bool,
    /// The native type was not recognised and fell back to text.
    pub unmapped: bool,
    /// Warning message if the conversion is lossy.
    pub warning: Option<String>,
}

impl CanonicalTypeInfo {
    /// Create a lossless canonical type conversion.
    pub fn lossless(canonical_type: CanonicalType) -> Self {
        Self {
            canonical_type,
            is_lossy: false,
            unmapped: false,
            warning: None,
        }
    }

    /// Create a lossy canonical type conversion with a warning.
    pub fn lossy(canonical_type: CanonicalType, warning: impl Into<String>) -> Self {
        Self {
            canonical_type,
            is_lossy: true,
            unmapped: false,
            warning: Some(warning.into()),
        }
    }

    /// Unknown native type: treated as text, native name kept by the caller.
    pub fn fallback(dialect: DialectKind, native: &str) -> Self {
        Self {
            canonical_type: CanonicalType::Text,
            is_lossy: true,
            unmapped: true,
            warning: Some(format!(
                "Unknown {} type '{}' treated as text",
                dialect, native
            )),
        }
    }
}

/// Result of rendering a canonical type for a target dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    /// Native type as it appears in DDL.
    pub target_type: String,
    /// Whether the mapping loses information.
    pub is_lossy: bool,
    /// Warning message for lossy mappings.
    pub warning: Option<String>,
}

impl TypeMapping {
    /// Create a lossless type mapping.
    pub fn lossless(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: false,
            warning: None,
        }
    }

    /// Create a lossy type mapping with a warning.
    pub fn lossy(target_type: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: true,
            warning: Some(warning.into()),
        }
    }
}

/// Convert native database types to canonical types.
pub trait ToCanonical: Send + Sync {
    /// Dialect this converter reads.
    fn dialect(&self) -> DialectKind;

    /// Convert a native type to canonical form.
    ///
    /// # Arguments
    ///
    /// * `native` - The native type name as reported by the engine
    /// * `max_length` - Character length, when the catalog reports it separately
    /// * `precision` - Numeric precision, when reported separately
    /// * `scale` - Numeric scale, when reported separately
    fn to_canonical(
        &self,
        native: &str,
        max_length: Option<u32>,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> CanonicalTypeInfo;
}

/// Convert canonical types to native database types.
#[allow(clippy::wrong_self_convention)]
pub trait FromCanonical: Send + Sync {
    /// Dialect this converter writes.
    fn dialect(&self) -> DialectKind;

    /// Convert a canonical type to native form.
    fn from_canonical(&self, canonical: &CanonicalType) -> TypeMapping;
}

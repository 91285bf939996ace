//! Conversion between [`SqlValue`] and the PostgreSQL wire format.
//!
//! Parameters are encoded by the *target* column type reported by the
//! server, so a value read from SQLite (where an integer column may hold
//! text and booleans are 0/1) is coerced at bind time rather than by the
//! caller.

use std::error::Error;
use std::str::FromStr;
use std::sync::Arc;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, Kind, ToSql, Type};
use uuid::Uuid;

use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

type BoxError = Box<dyn Error + Sync + Send>;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => self.to_bool()?.to_sql(ty, out),
            Type::INT2 => i16::try_from(self.to_int()?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(self.to_int()?)?.to_sql(ty, out),
            Type::INT8 => self.to_int()?.to_sql(ty, out),
            Type::OID => u32::try_from(self.to_int()?)?.to_sql(ty, out),
            Type::FLOAT4 => (self.to_float()? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.to_float()?.to_sql(ty, out),
            Type::NUMERIC => self.to_decimal()?.to_sql(ty, out),
            Type::DATE => self.to_date()?.to_sql(ty, out),
            Type::TIME => self.to_time()?.to_sql(ty, out),
            Type::TIMESTAMP => self.to_naive_datetime()?.to_sql(ty, out),
            Type::TIMESTAMPTZ => self.to_utc_datetime()?.to_sql(ty, out),
            Type::UUID => self.to_uuid()?.to_sql(ty, out),
            Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
            Type::BYTEA => self.to_bytes().to_sql(ty, out),
            _ => match ty.kind() {
                Kind::Array(member) => self.to_array(member, ty, out),
                _ => {
                    let text = self.to_text().unwrap_or_default();
                    text.as_str().to_sql(&Type::TEXT, out)
                }
            },
        }
    }

    // Coercion decides per value whether the target type can be produced.
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl SqlValue {
    fn mismatch(&self, target: &str) -> BoxError {
        format!("cannot convert {:?} to {}", self, target).into()
    }

    fn to_bool(&self) -> std::result::Result<bool, BoxError> {
        self.as_bool().ok_or_else(|| self.mismatch("boolean"))
    }

    fn to_int(&self) -> std::result::Result<i64, BoxError> {
        match self {
            SqlValue::F64(v) if v.fract() == 0.0 => Ok(*v as i64),
            SqlValue::Decimal(d) if d.fract().is_zero() => {
                i64::try_from(*d).map_err(|_| self.mismatch("integer"))
            }
            _ => self.as_i64().ok_or_else(|| self.mismatch("integer")),
        }
    }

    fn to_float(&self) -> std::result::Result<f64, BoxError> {
        match self {
            SqlValue::F64(v) => Ok(*v),
            SqlValue::I64(v) => Ok(*v as f64),
            SqlValue::Decimal(d) => d.to_string().parse().map_err(BoxError::from),
            SqlValue::Text(s) => s.trim().parse().map_err(BoxError::from),
            _ => Err(self.mismatch("double precision")),
        }
    }

    fn to_decimal(&self) -> std::result::Result<Decimal, BoxError> {
        match self {
            SqlValue::Decimal(d) => Ok(*d),
            SqlValue::I64(v) => Ok(Decimal::from(*v)),
            SqlValue::F64(v) => Decimal::from_f64(*v).ok_or_else(|| self.mismatch("numeric")),
            SqlValue::Bool(b) => Ok(Decimal::from(i64::from(*b))),
            SqlValue::Text(s) => {
                let s = s.trim();
                Decimal::from_str(s)
                    .or_else(|_| Decimal::from_scientific(s))
                    .map_err(BoxError::from)
            }
            _ => Err(self.mismatch("numeric")),
        }
    }

    fn to_date(&self) -> std::result::Result<NaiveDate, BoxError> {
        match self {
            SqlValue::Date(d) => Ok(*d),
            SqlValue::DateTime(dt) => Ok(dt.date()),
            SqlValue::DateTimeTz(dt) => Ok(dt.date_naive()),
            SqlValue::Text(s) => {
                let s = s.trim();
                let day = s.get(..10).unwrap_or(s);
                NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(BoxError::from)
            }
            _ => Err(self.mismatch("date")),
        }
    }

    fn to_time(&self) -> std::result::Result<NaiveTime, BoxError> {
        match self {
            SqlValue::Time(t) => Ok(*t),
            SqlValue::DateTime(dt) => Ok(dt.time()),
            SqlValue::Text(s) => {
                let s = s.trim();
                NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                    .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                    .map_err(BoxError::from)
            }
            _ => Err(self.mismatch("time")),
        }
    }

    fn to_naive_datetime(&self) -> std::result::Result<NaiveDateTime, BoxError> {
        match self {
            SqlValue::DateTime(dt) => Ok(*dt),
            SqlValue::DateTimeTz(dt) => Ok(dt.naive_utc()),
            SqlValue::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
            SqlValue::Text(s) => parse_datetime_text(s).ok_or_else(|| self.mismatch("timestamp")),
            _ => Err(self.mismatch("timestamp")),
        }
    }

    fn to_utc_datetime(&self) -> std::result::Result<DateTime<Utc>, BoxError> {
        match self {
            SqlValue::DateTimeTz(dt) => Ok(*dt),
            SqlValue::DateTime(dt) => Ok(dt.and_utc()),
            SqlValue::Date(d) => Ok(d.and_time(NaiveTime::MIN).and_utc()),
            SqlValue::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| parse_datetime_text(s).map(|dt| dt.and_utc()))
                .ok_or_else(|| self.mismatch("timestamptz")),
            _ => Err(self.mismatch("timestamptz")),
        }
    }

    fn to_uuid(&self) -> std::result::Result<Uuid, BoxError> {
        match self {
            SqlValue::Uuid(u) => Ok(*u),
            SqlValue::Text(s) => Uuid::parse_str(s.trim()).map_err(BoxError::from),
            SqlValue::Bytes(b) => Uuid::from_slice(b).map_err(BoxError::from),
            _ => Err(self.mismatch("uuid")),
        }
    }

    /// JSON document for a json/jsonb column. Text that is not valid JSON is
    /// stored as a JSON string.
    fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Json(v) => v.clone(),
            SqlValue::Text(s) => serde_json::from_str(s)
                .unwrap_or_else(|_| serde_json::Value::String(s.clone())),
            SqlValue::Bool(b) => serde_json::Value::Bool(*b),
            SqlValue::I64(v) => serde_json::Value::from(*v),
            SqlValue::F64(v) => serde_json::Value::from(*v),
            other => serde_json::Value::String(other.to_text().unwrap_or_default()),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            SqlValue::Bytes(b) => b.clone(),
            other => other.to_text().unwrap_or_default().into_bytes(),
        }
    }

    /// Arrays arrive as JSON (read from PostgreSQL) or JSON text (stored in
    /// SQLite).
    fn to_array(
        &self,
        member: &Type,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, BoxError> {
        let items = match self.to_json() {
            serde_json::Value::Array(items) => items,
            _ => return Err(self.mismatch(ty.name())),
        };
        let elements: Vec<SqlValue> = items.into_iter().map(SqlValue::from_json_element).collect();

        match *member {
            Type::BOOL => collect_elements(&elements, SqlValue::to_bool)?.to_sql(ty, out),
            Type::INT2 => collect_elements(&elements, |v| Ok(i16::try_from(v.to_int()?)?))?
                .to_sql(ty, out),
            Type::INT4 => collect_elements(&elements, |v| Ok(i32::try_from(v.to_int()?)?))?
                .to_sql(ty, out),
            Type::INT8 => collect_elements(&elements, SqlValue::to_int)?.to_sql(ty, out),
            Type::FLOAT4 => collect_elements(&elements, |v| Ok(v.to_float()? as f32))?
                .to_sql(ty, out),
            Type::FLOAT8 => collect_elements(&elements, SqlValue::to_float)?.to_sql(ty, out),
            Type::NUMERIC => collect_elements(&elements, SqlValue::to_decimal)?.to_sql(ty, out),
            Type::UUID => collect_elements(&elements, SqlValue::to_uuid)?.to_sql(ty, out),
            _ => collect_elements(&elements, |v| Ok(v.to_text().unwrap_or_default()))?
                .to_sql(ty, out),
        }
    }

    fn from_json_element(value: serde_json::Value) -> SqlValue {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::I64(i),
                None => SqlValue::F64(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => SqlValue::Text(s),
            other => SqlValue::Json(other),
        }
    }
}

fn collect_elements<T>(
    elements: &[SqlValue],
    convert: impl Fn(&SqlValue) -> std::result::Result<T, BoxError>,
) -> std::result::Result<Vec<Option<T>>, BoxError> {
    elements
        .iter()
        .map(|v| if v.is_null() { Ok(None) } else { convert(v).map(Some) })
        .collect()
}

/// Parse the timestamp spellings SQLite applications commonly store.
fn parse_datetime_text(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_end_matches('Z');
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Decode a result set by the column types the server reports.
pub(crate) fn decode_rows(rows: &[tokio_postgres::Row]) -> Result<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>()
        .into();

    rows.iter()
        .map(|row| {
            let values = (0..columns.len())
                .map(|idx| decode_value(row, idx))
                .collect::<Result<Vec<_>>>()?;
            Ok(Row::new(Arc::clone(&columns), values))
        })
        .collect()
}

fn decode_value(row: &tokio_postgres::Row, idx: usize) -> Result<SqlValue> {
    let ty = row.columns()[idx].type_().clone();

    macro_rules! get {
        ($t:ty, $wrap:expr) => {
            row.try_get::<_, Option<$t>>(idx)?
                .map($wrap)
                .unwrap_or(SqlValue::Null)
        };
    }

    let value = match ty {
        Type::BOOL => get!(bool, SqlValue::Bool),
        Type::INT2 => get!(i16, |v| SqlValue::I64(i64::from(v))),
        Type::INT4 => get!(i32, |v| SqlValue::I64(i64::from(v))),
        Type::INT8 => get!(i64, SqlValue::I64),
        Type::OID => get!(u32, |v| SqlValue::I64(i64::from(v))),
        Type::FLOAT4 => get!(f32, |v| SqlValue::F64(f64::from(v))),
        Type::FLOAT8 => get!(f64, SqlValue::F64),
        Type::NUMERIC => get!(Decimal, SqlValue::Decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get!(String, SqlValue::Text)
        }
        Type::CHAR => get!(i8, |v| SqlValue::Text(((v as u8) as char).to_string())),
        Type::BYTEA => get!(Vec<u8>, SqlValue::Bytes),
        Type::UUID => get!(Uuid, SqlValue::Uuid),
        Type::DATE => get!(NaiveDate, SqlValue::Date),
        Type::TIME => get!(NaiveTime, SqlValue::Time),
        Type::TIMESTAMP => get!(NaiveDateTime, SqlValue::DateTime),
        Type::TIMESTAMPTZ => get!(DateTime<Utc>, SqlValue::DateTimeTz),
        Type::JSON | Type::JSONB => get!(serde_json::Value, SqlValue::Json),
        Type::BOOL_ARRAY => get!(Vec<Option<bool>>, json_array),
        Type::INT2_ARRAY => get!(Vec<Option<i16>>, json_array),
        Type::INT4_ARRAY => get!(Vec<Option<i32>>, json_array),
        Type::INT8_ARRAY => get!(Vec<Option<i64>>, json_array),
        Type::FLOAT4_ARRAY => get!(Vec<Option<f32>>, json_array),
        Type::FLOAT8_ARRAY => get!(Vec<Option<f64>>, json_array),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            get!(Vec<Option<String>>, json_array)
        }
        Type::UUID_ARRAY => get!(Vec<Option<Uuid>>, |v: Vec<Option<Uuid>>| {
            json_array(
                v.into_iter()
                    .map(|u| u.map(|u| u.to_string()))
                    .collect::<Vec<_>>(),
            )
        }),
        Type::NUMERIC_ARRAY => get!(Vec<Option<Decimal>>, |v: Vec<Option<Decimal>>| {
            json_array(
                v.into_iter()
                    .map(|d| d.map(|d| d.to_string()))
                    .collect::<Vec<_>>(),
            )
        }),
        other => {
            return Err(MigrateError::Encode(format!(
                "column '{}' has type {} which must be read as text",
                row.columns()[idx].name(),
                other.name()
            )))
        }
    };
    Ok(value)
}

fn json_array<T: serde::Serialize>(items: Vec<Option<T>>) -> SqlValue {
    SqlValue::Json(serde_json::to_value(items).unwrap_or(serde_json::Value::Null))
}

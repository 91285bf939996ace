//! SQL value and row types shared by every database handle.
//!
//! Values are owned: a batch is read from the source, converted, and bound
//! to the target in the same unit of work, so borrowing from driver buffers
//! would buy nothing.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
    /// Timestamp with timezone, normalized to UTC.
    DateTimeTz(DateTime<Utc>),
    /// JSON document or array. PostgreSQL arrays are read into this form.
    Json(serde_json::Value),
}

impl SqlValue {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view of the value, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I64(v) => Some(*v),
            SqlValue::Bool(v) => Some(i64::from(*v)),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow text content.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view, accepting the integer and text spellings SQLite stores.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::I64(v) => Some(*v != 0),
            SqlValue::Text(s) => parse_bool(s),
            _ => None,
        }
    }

    /// Render the value as text. Used when the target column is textual or
    /// has no native equivalent.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(v) => Some(v.to_string()),
            SqlValue::I64(v) => Some(v.to_string()),
            SqlValue::F64(v) => Some(v.to_string()),
            SqlValue::Decimal(v) => Some(v.to_string()),
            SqlValue::Text(v) => Some(v.clone()),
            SqlValue::Bytes(v) => Some(String::from_utf8_lossy(v).into_owned()),
            SqlValue::Uuid(v) => Some(v.to_string()),
            SqlValue::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            SqlValue::Time(v) => Some(v.format("%H:%M:%S%.f").to_string()),
            SqlValue::DateTime(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            SqlValue::DateTimeTz(v) => Some(v.to_rfc3339()),
            SqlValue::Json(v) => Some(v.to_string()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Parse the boolean spellings found in dynamically typed data.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A result row. Column names are shared between rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Build a row from shared column names and its values.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Take the values.
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Value by column name.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// Value by position.
    pub fn get_idx(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    /// Text column, `None` for NULL or missing.
    pub fn get_str(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            SqlValue::Null => None,
            other => other.to_text(),
        }
    }

    /// Integer column, `None` for NULL, missing or non-numeric.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_i64()
    }

    /// Boolean column.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    /// Text-array column (PostgreSQL arrays arrive as JSON arrays).
    pub fn get_str_list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(SqlValue::Json(serde_json::Value::Array(items))) => items
                .iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_row() -> Row {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string(), "tags".to_string()].into();
        Row::new(
            columns,
            vec![
                SqlValue::I64(7),
                SqlValue::Text("ada".into()),
                SqlValue::Json(serde_json::json!(["a", "b"])),
            ],
        )
    }

    #[test]
    fn test_row_accessors() {
        let row = make_test_row();
        assert_eq!(row.get_i64("id"), Some(7));
        assert_eq!(row.get_str("name").as_deref(), Some("ada"));
        assert_eq!(row.get_str_list("tags"), vec!["a", "b"]);
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_bool_spellings() {
        assert_eq!(SqlValue::I64(1).as_bool(), Some(true));
        assert_eq!(SqlValue::Text("f".into()).as_bool(), Some(false));
        assert_eq!(SqlValue::Text("maybe".into()).as_bool(), None);
    }

    #[test]
    fn test_to_text() {
        assert_eq!(SqlValue::Null.to_text(), None);
        assert_eq!(SqlValue::F64(1.5).to_text().as_deref(), Some("1.5"));
        assert_eq!(
            SqlValue::Json(serde_json::json!([1, 2])).to_text().as_deref(),
            Some("[1,2]")
        );
    }
}

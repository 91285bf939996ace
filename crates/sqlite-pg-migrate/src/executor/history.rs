//! Migration history table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::capability::DialectKind;
use crate::core::traits::{DatabaseHandle, Dialect, InsertColumn};
use crate::core::value::SqlValue;
use crate::drivers::DialectImpl;
use crate::error::Result;

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub checksum: String,
    pub applied_at: String,
    pub statements: i64,
    pub rows_migrated: i64,
}

/// The tracking table in one target namespace.
#[derive(Debug, Clone)]
pub struct HistoryTable {
    dialect: DialectImpl,
    namespace: String,
    name: String,
}

impl HistoryTable {
    pub fn new(dialect: DialectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dialect: DialectImpl::for_kind(dialect),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn table_ref(&self) -> String {
        self.dialect.qualify(&self.namespace, &self.name)
    }

    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, checksum TEXT NOT NULL, \
             applied_at TEXT NOT NULL, statements BIGINT NOT NULL, rows_migrated BIGINT NOT NULL)",
            self.table_ref()
        )
    }

    /// Parameterized INSERT and its values.
    pub fn insert(
        &self,
        run_id: &str,
        checksum: &str,
        applied_at: DateTime<Utc>,
        statements: usize,
        rows_migrated: i64,
    ) -> (String, Vec<SqlValue>) {
        let columns: Vec<InsertColumn> = ["id", "checksum", "applied_at", "statements", "rows_migrated"]
            .into_iter()
            .map(InsertColumn::plain)
            .collect();
        let sql = self
            .dialect
            .build_insert_query(&self.table_ref(), &columns, 1, None);
        let params = vec![
            SqlValue::Text(run_id.to_string()),
            SqlValue::Text(checksum.to_string()),
            SqlValue::Text(applied_at.to_rfc3339()),
            SqlValue::I64(statements as i64),
            SqlValue::I64(rows_migrated),
        ];
        (sql, params)
    }

    async fn exists(&self, db: &dyn DatabaseHandle) -> Result<bool> {
        let rows = match self.dialect.kind() {
            DialectKind::Sqlite => {
                db.query(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    &[SqlValue::from(self.name.as_str())],
                )
                .await?
            }
            DialectKind::Postgres => {
                db.query(
                    "SELECT table_name FROM information_schema.tables \
                     WHERE table_schema = $1 AND table_name = $2",
                    &[
                        SqlValue::from(self.namespace.as_str()),
                        SqlValue::from(self.name.as_str()),
                    ],
                )
                .await?
            }
        };
        Ok(!rows.is_empty())
    }

    /// Applied entries, oldest first. Empty when the table does not exist yet.
    pub async fn entries(&self, db: &dyn DatabaseHandle) -> Result<Vec<HistoryEntry>> {
        if !self.exists(db).await? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, checksum, applied_at, statements, rows_migrated FROM {} ORDER BY applied_at, id",
            self.table_ref()
        );
        let rows = db.query(&sql, &[]).await?;
        Ok(rows
            .iter()
            .map(|r| HistoryEntry {
                id: r.get_str("id").unwrap_or_default(),
                checksum: r.get_str("checksum").unwrap_or_default(),
                applied_at: r.get_str("applied_at").unwrap_or_default(),
                statements: r.get_i64("statements").unwrap_or(0),
                rows_migrated: r.get_i64("rows_migrated").unwrap_or(0),
            })
            .collect())
    }
}

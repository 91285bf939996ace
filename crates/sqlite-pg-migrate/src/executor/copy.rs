//! Batched row copy and the statement sink shared by execution and dry-run.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::traits::{
    DatabaseHandle, Dialect, InsertColumn, SelectColumn, SelectQueryOptions, TransactionHandle,
};
use crate::core::value::SqlValue;
use crate::drivers::DialectImpl;
use crate::error::{MigrateError, Result};
use crate::planner::{CopyTask, Pagination};

/// Where target statements go.
///
/// Execution and dry-run drive the same code against this; the only
/// difference is whether the SQL reaches the server.
pub(crate) enum Sink<'r> {
    Transaction(Box<dyn TransactionHandle>),
    Recorder(&'r mut Vec<String>),
}

impl Sink<'_> {
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        match self {
            Sink::Transaction(tx) => tx.execute(sql, params).await,
            Sink::Recorder(out) => {
                out.push(sql.to_string());
                Ok(0)
            }
        }
    }

    pub async fn commit(self) -> Result<()> {
        match self {
            Sink::Transaction(tx) => tx.commit().await,
            Sink::Recorder(_) => Ok(()),
        }
    }

    pub async fn rollback(self) {
        if let Sink::Transaction(tx) = self {
            if let Err(e) = tx.rollback().await {
                debug!("Rollback failed: {}", e);
            }
        }
    }
}

/// Rows and read batches of one copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub rows: i64,
    pub batches: u64,
}

/// Copy one table in `⌈N/B⌉` bounded reads, N fixed by an initial count.
pub(crate) async fn copy_table(
    source: &dyn DatabaseHandle,
    target_dialect: &DialectImpl,
    task: &CopyTask,
    sink: &mut Sink<'_>,
    cancel: &CancellationToken,
) -> Result<CopyStats> {
    let source_dialect = DialectImpl::for_kind(source.dialect());
    let source_ref = source_dialect.qualify(&task.source_namespace, &task.source_table);
    let target_ref = target_dialect.qualify(&task.target_namespace, &task.target_table);
    let batch_size = task.batch_size.max(1);

    let count_rows = source
        .query(&source_dialect.build_count_query(&source_ref), &[])
        .await?;
    let total = count_rows
        .first()
        .and_then(|r| r.get_i64("row_count"))
        .unwrap_or(0)
        .max(0) as u64;
    let batches = total.div_ceil(batch_size as u64);
    debug!(
        "{}: {} rows in {} batch(es) of {}",
        task.source_table, total, batches, batch_size
    );

    let insert_columns: Vec<InsertColumn> = task
        .columns
        .iter()
        .map(|c| InsertColumn {
            name: c.name.clone(),
            text_cast: c.text_cast.clone(),
        })
        .collect();
    let rows_per_insert = (target_dialect.kind().capabilities().max_bind_params / insert_columns.len().max(1))
        .clamp(1, batch_size);

    let mut opts = SelectQueryOptions {
        table_ref: source_ref,
        columns: task
            .columns
            .iter()
            .map(|c| SelectColumn {
                name: c.name.clone(),
                as_text: c.read_as_text,
            })
            .collect(),
        limit: Some(batch_size),
        ..Default::default()
    };
    let key_idx = match &task.pagination {
        Pagination::Keyset { column } => {
            opts.order_by = vec![column.clone()];
            task.columns.iter().position(|c| &c.name == column)
        }
        Pagination::Ordered { order_by } => {
            opts.order_by = order_by.clone();
            None
        }
        Pagination::Rowid => {
            opts.order_by_rowid = true;
            None
        }
    };
    let keyset_column = match &task.pagination {
        Pagination::Keyset { column } if key_idx.is_some() => Some(column.clone()),
        _ => None,
    };

    let mut stats = CopyStats::default();
    let mut last_key: Option<SqlValue> = None;

    for batch in 0..batches {
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        let (sql, params) = match (&keyset_column, &last_key) {
            (Some(col), Some(key)) => {
                let sql = source_dialect.build_select_query(&SelectQueryOptions {
                    keyset_column: Some(col.clone()),
                    ..opts.clone()
                });
                (sql, vec![key.clone()])
            }
            (Some(_), None) => (source_dialect.build_select_query(&opts), Vec::new()),
            (None, _) => {
                let sql = source_dialect.build_select_query(&SelectQueryOptions {
                    offset: Some(batch * batch_size as u64),
                    ..opts.clone()
                });
                (sql, Vec::new())
            }
        };

        let rows = source.query(&sql, &params).await?;
        stats.batches += 1;
        if rows.is_empty() {
            break;
        }
        if let Some(idx) = key_idx {
            last_key = rows.last().and_then(|r| r.get_idx(idx)).cloned();
        }

        let row_count = rows.len();
        let mut values: Vec<Vec<SqlValue>> = rows.into_iter().map(|r| r.into_values()).collect();
        while !values.is_empty() {
            let take = values.len().min(rows_per_insert);
            let chunk: Vec<Vec<SqlValue>> = values.drain(..take).collect();
            let sql = target_dialect.build_insert_query(
                &target_ref,
                &insert_columns,
                chunk.len(),
                task.conflict_columns.as_deref(),
            );
            let params: Vec<SqlValue> = chunk.into_iter().flatten().collect();
            sink.execute(&sql, &params)
                .await
                .map_err(|e| MigrateError::execution(&task.target_table, e.to_string()))?;
        }
        stats.rows += row_count as i64;
    }

    Ok(stats)
}

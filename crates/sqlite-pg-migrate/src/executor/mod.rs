//! Migration executor.
//!
//! Applies a [`MigrationPlan`] one table unit per target transaction. A failed
//! unit rolls back alone; units that committed stay committed, so a run can
//! succeed partially at table granularity. The result lists which tables
//! failed.
//!
//! Dry-run drives exactly the same code with a recording sink instead of a
//! transaction, so the SQL it reports is the SQL execution would send.

mod copy;
pub mod history;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MigrationConfig;
use crate::core::capability::DialectKind;
use crate::core::traits::{DatabaseHandle, MigrationLockGuard};
use crate::drivers::DialectImpl;
use crate::error::{MigrateError, Result};
use crate::planner::{MigrationPlan, PlanStatement, StatementKind, TableUnit, UnitAction};

use copy::{copy_table, Sink};
pub use copy::CopyStats;
pub use history::{HistoryEntry, HistoryTable};

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub continue_on_error: bool,
    pub parallel: bool,
    pub workers: usize,
    pub history_table: String,
    pub lock_table: String,
    pub lock_attempts: u32,
    pub lock_retry_ms: u64,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default())
    }
}

impl ExecutorOptions {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            continue_on_error: config.continue_on_error,
            parallel: config.parallel,
            workers: config.get_workers(),
            history_table: config.history_table.clone(),
            lock_table: config.lock_table.clone(),
            lock_attempts: config.lock_attempts,
            lock_retry_ms: config.lock_retry_ms,
        }
    }
}

/// Counts of what a run changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Descriptions of the structural statements applied.
    pub schema_changes: Vec<String>,
    pub schema_change_count: usize,
    pub tables_created: usize,
    pub tables_dropped: usize,
    pub indexes_created: usize,
    pub statements_executed: usize,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier, also the history entry id.
    pub run_id: String,

    /// No table failed and the run was not cancelled.
    pub success: bool,

    pub dry_run: bool,

    pub cancelled: bool,

    /// Table units committed (or recorded, in dry-run).
    pub tables_processed: usize,

    pub tables_failed: usize,

    pub failed_tables: Vec<String>,

    pub rows_migrated: i64,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub errors: Vec<String>,

    pub warnings: Vec<String>,

    pub summary: ExecutionSummary,

    /// SQL in execution order (dry-run only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statements: Vec<String>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Progress accumulated while driving a plan.
#[derive(Debug, Default)]
struct Progress {
    tables_processed: usize,
    rows: i64,
    summary: ExecutionSummary,
    failed_tables: Vec<String>,
    errors: Vec<String>,
    first_error: Option<MigrateError>,
    cancelled: bool,
}

impl Progress {
    fn applied<'s>(&mut self, statements: impl IntoIterator<Item = &'s PlanStatement>) {
        for stmt in statements {
            self.summary.statements_executed += 1;
            match stmt.kind {
                StatementKind::CreateTable => self.summary.tables_created += 1,
                StatementKind::DropTable => self.summary.tables_dropped += 1,
                StatementKind::CreateIndex => self.summary.indexes_created += 1,
                _ => {}
            }
            if stmt.kind.is_schema_change() {
                self.summary.schema_changes.push(stmt.description.clone());
                self.summary.schema_change_count += 1;
            }
        }
    }

    fn record(&mut self, unit: &TableUnit, result: Result<i64>) {
        match result {
            Ok(rows) => {
                self.tables_processed += 1;
                self.rows += rows;
                self.applied(unit.statements.iter().chain(unit.after_copy.iter()));
                if unit.action != UnitAction::Drop {
                    info!("{}: done ({} rows)", unit.table, rows);
                }
            }
            Err(MigrateError::Cancelled) => {
                warn!("{}: cancelled, rolled back", unit.table);
                self.cancelled = true;
            }
            Err(e) => {
                error!("{}: {}", unit.table, e);
                self.failed_tables.push(unit.table.clone());
                self.errors.push(e.to_string());
                self.first_error.get_or_insert(e);
            }
        }
    }

    fn halted(&self, continue_on_error: bool) -> bool {
        self.cancelled || (!continue_on_error && !self.errors.is_empty())
    }
}

/// Where a run sends target statements.
enum Target<'r> {
    Live(Arc<dyn DatabaseHandle>),
    DryRun(&'r mut Vec<String>),
}

impl Target<'_> {
    async fn open(&mut self) -> Result<Sink<'_>> {
        match self {
            Target::Live(db) => Ok(Sink::Transaction(db.begin().await?)),
            Target::DryRun(out) => Ok(Sink::Recorder(&mut **out)),
        }
    }
}

/// Statements, copy, then post-copy statements of one unit.
async fn run_unit(
    source: &dyn DatabaseHandle,
    dialect: &DialectImpl,
    unit: &TableUnit,
    sink: &mut Sink<'_>,
    cancel: &CancellationToken,
) -> Result<i64> {
    for stmt in &unit.statements {
        sink.execute(&stmt.sql, &[])
            .await
            .map_err(|e| MigrateError::execution(&unit.table, format!("{}: {}", stmt.description, e)))?;
    }

    let mut rows = 0;
    if let Some(task) = &unit.copy {
        rows = match copy_table(source, dialect, task, sink, cancel).await {
            Ok(stats) => stats.rows,
            Err(e @ (MigrateError::Cancelled | MigrateError::MigrationExecution { .. })) => return Err(e),
            Err(e) => return Err(MigrateError::execution(&unit.table, format!("copy failed: {}", e))),
        };
    }

    for stmt in &unit.after_copy {
        sink.execute(&stmt.sql, &[])
            .await
            .map_err(|e| MigrateError::execution(&unit.table, format!("{}: {}", stmt.description, e)))?;
    }
    Ok(rows)
}

/// Run a unit in its own target transaction.
async fn apply_unit(
    source: &dyn DatabaseHandle,
    target: &mut Target<'_>,
    dialect: &DialectImpl,
    unit: &TableUnit,
    cancel: &CancellationToken,
) -> Result<i64> {
    let mut sink = target
        .open()
        .await
        .map_err(|e| MigrateError::execution(&unit.table, format!("begin failed: {}", e)))?;
    match run_unit(source, dialect, unit, &mut sink, cancel).await {
        Ok(rows) => {
            sink.commit()
                .await
                .map_err(|e| MigrateError::execution(&unit.table, format!("commit failed: {}", e)))?;
            Ok(rows)
        }
        Err(e) => {
            sink.rollback().await;
            Err(e)
        }
    }
}

/// Group units into foreign-key-connected components, preserving plan order
/// within and across components.
fn components(units: &[&TableUnit]) -> Vec<Vec<usize>> {
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let index: HashMap<&str, usize> = units
        .iter()
        .enumerate()
        .map(|(i, u)| (u.table.as_str(), i))
        .collect();
    let mut parent: Vec<usize> = (0..units.len()).collect();
    for (i, unit) in units.iter().enumerate() {
        for dep in &unit.depends_on {
            if let Some(&j) = index.get(dep.as_str()) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot: HashMap<usize, usize> = HashMap::new();
    for i in 0..units.len() {
        let root = find(&mut parent, i);
        let pos = *slot.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[pos].push(i);
    }
    groups
}

/// Applies plans. Stateless apart from its options.
#[derive(Debug, Clone, Default)]
pub struct MigrationExecutor {
    options: ExecutorOptions,
}

impl MigrationExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }

    /// Execute `plan`, or with `dry_run` only record its SQL.
    ///
    /// Table failures are reported in the result. Lock, pre-hook and history
    /// failures are returned as errors, as is a fail-fast run in which no
    /// table succeeded.
    pub async fn execute(
        &self,
        plan: &MigrationPlan,
        source: Arc<dyn DatabaseHandle>,
        target: Arc<dyn DatabaseHandle>,
        cancel: CancellationToken,
        dry_run: bool,
    ) -> Result<MigrationResult> {
        if dry_run {
            let mut statements = Vec::new();
            let mut result = self
                .drive(plan, source, Target::DryRun(&mut statements), &cancel)
                .await?;
            result.statements = statements;
            return Ok(result);
        }

        let guard = self.acquire_lock(target.as_ref()).await?;
        let outcome = self.drive(plan, source, Target::Live(target), &cancel).await;
        if let Err(e) = guard.release().await {
            warn!("Failed to release migration lock: {}", e);
        }
        outcome
    }

    /// The statements [`execute`](Self::execute) would send, in order.
    ///
    /// Reads the source to render the row copies; never touches the target.
    pub async fn generate_sql(
        &self,
        plan: &MigrationPlan,
        source: Arc<dyn DatabaseHandle>,
    ) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        self.drive(plan, source, Target::DryRun(&mut statements), &CancellationToken::new())
            .await?;
        Ok(statements)
    }

    /// Take the migration lock, backing off exponentially between attempts.
    async fn acquire_lock(&self, target: &dyn DatabaseHandle) -> Result<Box<dyn MigrationLockGuard>> {
        let attempts = self.options.lock_attempts.max(1);
        let mut delay = Duration::from_millis(self.options.lock_retry_ms);
        for attempt in 1..=attempts {
            if let Some(guard) = target
                .try_acquire_migration_lock(&self.options.lock_table)
                .await?
            {
                debug!("Holding migration lock '{}'", guard.lock_name());
                return Ok(guard);
            }
            if attempt < attempts {
                warn!(
                    "Migration lock '{}' is held by another run; retrying in {:?} ({}/{})",
                    self.options.lock_table, delay, attempt, attempts
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }
        Err(MigrateError::LockAcquisition {
            lock: self.options.lock_table.clone(),
            attempts,
        })
    }

    async fn drive(
        &self,
        plan: &MigrationPlan,
        source: Arc<dyn DatabaseHandle>,
        mut target: Target<'_>,
        cancel: &CancellationToken,
    ) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let dry_run = matches!(target, Target::DryRun(_));
        let dialect = DialectImpl::for_kind(plan.target_dialect);
        let history = HistoryTable::new(
            plan.target_dialect,
            plan.target_namespace.clone(),
            self.options.history_table.clone(),
        );
        let mut progress = Progress::default();

        info!(
            "{} plan {} ({} unit(s))",
            if dry_run { "Rendering" } else { "Executing" },
            &plan.checksum[..plan.checksum.len().min(12)],
            plan.migrations.len()
        );

        // Pre-hooks and the history table share one transaction.
        {
            let mut sink = target.open().await?;
            let mut pre = async {
                for stmt in &plan.pre_hooks {
                    sink.execute(&stmt.sql, &[]).await?;
                }
                sink.execute(&history.create_sql(), &[]).await?;
                Ok::<_, MigrateError>(())
            }
            .await;
            if pre.is_ok() {
                pre = sink.commit().await;
            } else {
                sink.rollback().await;
            }
            pre?;
            progress.applied(&plan.pre_hooks);
        }

        let (drops, units): (Vec<&TableUnit>, Vec<&TableUnit>) = plan
            .migrations
            .iter()
            .partition(|u| u.action == UnitAction::Drop);

        // Drops run first and one at a time; a view may depend on a table.
        let parallel = self.options.parallel && self.options.workers > 1 && units.len() > 1;
        let concurrent_target = match &target {
            Target::Live(db) if parallel && plan.target_dialect != DialectKind::Sqlite => Some(db.clone()),
            _ => None,
        };
        if parallel && concurrent_target.is_none() {
            debug!("Running table units sequentially (single writer)");
        }
        let sequential: &[&TableUnit] = if concurrent_target.is_some() { &[] } else { &units };

        for unit in drops.iter().chain(sequential.iter()) {
            if progress.halted(self.options.continue_on_error) {
                break;
            }
            if cancel.is_cancelled() {
                progress.cancelled = true;
                break;
            }
            let result = apply_unit(source.as_ref(), &mut target, &dialect, unit, cancel).await;
            progress.record(unit, result);
        }

        if let Some(db) = concurrent_target {
            if !progress.halted(self.options.continue_on_error) && !cancel.is_cancelled() {
                self.drive_parallel(&units, &source, &db, &dialect, cancel, &mut progress)
                    .await;
            }
        }
        if cancel.is_cancelled() {
            progress.cancelled = true;
        }

        if !progress.halted(self.options.continue_on_error) {
            for stmt in &plan.post_hooks {
                if cancel.is_cancelled() {
                    progress.cancelled = true;
                    break;
                }
                let mut sink = target.open().await?;
                match sink.execute(&stmt.sql, &[]).await {
                    Ok(_) => {
                        sink.commit().await?;
                        progress.applied([stmt]);
                    }
                    Err(e) => {
                        sink.rollback().await;
                        let table = stmt.table.clone().unwrap_or_default();
                        error!("{}: {} failed: {}", table, stmt.description, e);
                        let e = MigrateError::execution(&table, format!("{}: {}", stmt.description, e));
                        progress.errors.push(e.to_string());
                        progress.first_error.get_or_insert(e);
                        if !progress.failed_tables.contains(&table) {
                            progress.failed_tables.push(table);
                        }
                        if !self.options.continue_on_error {
                            break;
                        }
                    }
                }
            }
        }

        let success = progress.errors.is_empty() && !progress.cancelled;
        if !success && !self.options.continue_on_error && progress.tables_processed == 0 {
            if let Some(e) = progress.first_error.take() {
                return Err(e);
            }
        }

        if success {
            let statements = progress.summary.statements_executed;
            let (sql, params) = history.insert(&run_id, &plan.checksum, started_at, statements, progress.rows);
            let mut sink = target.open().await?;
            let recorded = sink.execute(&sql, &params).await;
            match recorded {
                Ok(_) => sink.commit().await?,
                Err(e) => {
                    sink.rollback().await;
                    return Err(e);
                }
            }
        }

        let result = MigrationResult {
            run_id,
            success,
            dry_run,
            cancelled: progress.cancelled,
            tables_processed: progress.tables_processed,
            tables_failed: progress.failed_tables.len(),
            failed_tables: progress.failed_tables,
            rows_migrated: progress.rows,
            duration_seconds: timer.elapsed().as_secs_f64(),
            started_at,
            completed_at: Utc::now(),
            errors: progress.errors,
            warnings: plan.warnings.clone(),
            summary: progress.summary,
            statements: Vec::new(),
        };
        info!(
            "Run {} {}: {} table(s), {} row(s) in {:.2}s",
            result.run_id,
            if result.success {
                "completed"
            } else if result.cancelled {
                "cancelled"
            } else {
                "finished with errors"
            },
            result.tables_processed,
            result.rows_migrated,
            result.duration_seconds
        );
        Ok(result)
    }

    /// Run foreign-key-connected components concurrently, each on its own
    /// transactions, bounded by `workers`.
    async fn drive_parallel(
        &self,
        units: &[&TableUnit],
        source: &Arc<dyn DatabaseHandle>,
        target: &Arc<dyn DatabaseHandle>,
        dialect: &DialectImpl,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) {
        let groups = components(units);
        let workers = self.options.workers.max(1);
        info!(
            "Running {} table group(s) with up to {} worker(s)",
            groups.len(),
            workers
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let halted = Arc::new(AtomicBool::new(false));
        let fail_fast = !self.options.continue_on_error;
        let mut handles = Vec::new();

        for group in groups {
            let group_units: Vec<TableUnit> = group.iter().map(|&i| units[i].clone()).collect();
            let source = source.clone();
            let target = target.clone();
            let dialect = dialect.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            let halted = halted.clone();

            handles.push(tokio::spawn(async move {
                let mut outcomes = Vec::new();
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return outcomes;
                };
                let mut live = Target::Live(target);
                for unit in group_units {
                    if cancel.is_cancelled() || halted.load(Ordering::SeqCst) {
                        break;
                    }
                    let result = apply_unit(source.as_ref(), &mut live, &dialect, &unit, &cancel).await;
                    if fail_fast && matches!(result, Err(ref e) if !matches!(e, MigrateError::Cancelled)) {
                        halted.store(true, Ordering::SeqCst);
                    }
                    outcomes.push((unit, result));
                }
                outcomes
            }));
        }

        for joined in join_all(handles).await {
            match joined {
                Ok(outcomes) => {
                    for (unit, result) in outcomes {
                        progress.record(&unit, result);
                    }
                }
                Err(e) => {
                    error!("Table worker panicked: {}", e);
                    progress.errors.push(format!("table worker panicked: {}", e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare;
    use crate::config::DiscoveryConfig;
    use crate::discovery::DiscoveryCoordinator;
    use crate::drivers::SqliteHandle;
    use crate::planner::{MigrationPlanner, PlanOptions};

    async fn make_test_source() -> Arc<dyn DatabaseHandle> {
        let db = SqliteHandle::memory().await.unwrap();
        for sql in [
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT UNIQUE, age INTEGER)",
            "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), title TEXT NOT NULL)",
            "CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT)",
            "INSERT INTO users (id, email, age) VALUES (1, 'a@x.io', 30), (2, 'b@x.io', NULL), (3, 'c@x.io', 41)",
            "INSERT INTO posts (id, user_id, title) VALUES (1, 1, 'hello'), (2, 3, 'again')",
            "INSERT INTO tags (id, name) VALUES (1, 'rust')",
        ] {
            db.execute(sql, &[]).await.unwrap();
        }
        Arc::new(db)
    }

    async fn make_test_plan(
        source: &dyn DatabaseHandle,
        target: &dyn DatabaseHandle,
        options: PlanOptions,
    ) -> MigrationPlan {
        let discovery = DiscoveryConfig {
            internal_tables: vec!["_schema_migrations".into(), "_schema_migration_lock".into()],
            ..Default::default()
        };
        let coordinator = DiscoveryCoordinator::with_builtins();
        let src = coordinator.discover(source, &discovery).await.unwrap();
        let tgt = coordinator.discover(target, &discovery).await.unwrap();
        MigrationPlanner::new(options)
            .plan(&compare(&tgt, &src), &src, &tgt, &[])
            .unwrap()
    }

    async fn count(db: &dyn DatabaseHandle, table: &str) -> i64 {
        let rows = db
            .query(&format!("SELECT COUNT(*) AS n FROM \"{}\"", table), &[])
            .await
            .unwrap();
        rows[0].get_i64("n").unwrap()
    }

    #[tokio::test]
    async fn test_execute_copies_all_tables() {
        let source = make_test_source().await;
        let target: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
        let plan = make_test_plan(source.as_ref(), target.as_ref(), PlanOptions::default()).await;

        let result = MigrationExecutor::default()
            .execute(&plan, source.clone(), target.clone(), CancellationToken::new(), false)
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.tables_processed, 3);
        assert_eq!(result.rows_migrated, 6);
        assert_eq!(result.summary.tables_created, 3);
        assert!(result.statements.is_empty());
        assert_eq!(count(target.as_ref(), "users").await, 3);
        assert_eq!(count(target.as_ref(), "posts").await, 2);

        let history = HistoryTable::new(DialectKind::Sqlite, "main", "_schema_migrations");
        let entries = history.entries(target.as_ref()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].checksum, plan.checksum);
        assert_eq!(entries[0].rows_migrated, 6);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_target_untouched() {
        let source = make_test_source().await;
        let target: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
        let plan = make_test_plan(source.as_ref(), target.as_ref(), PlanOptions::default()).await;

        let result = MigrationExecutor::default()
            .execute(&plan, source.clone(), target.clone(), CancellationToken::new(), true)
            .await
            .unwrap();
        assert!(result.dry_run);
        assert_eq!(result.rows_migrated, 6);
        assert!(result.statements.iter().any(|s| s.starts_with("CREATE TABLE \"users\"")));
        assert!(result.statements.last().unwrap().starts_with("INSERT INTO \"_schema_migrations\""));

        let tables = target
            .query("SELECT name FROM sqlite_master WHERE type = 'table'", &[])
            .await
            .unwrap();
        assert!(tables.is_empty());

        let generated = MigrationExecutor::default()
            .generate_sql(&plan, source.clone())
            .await
            .unwrap();
        assert_eq!(generated, result.statements);
    }

    #[tokio::test]
    async fn test_failed_unit_rolls_back_alone() {
        let source = make_test_source().await;
        let target: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
        let mut plan = make_test_plan(source.as_ref(), target.as_ref(), PlanOptions::default()).await;
        let tags = plan
            .migrations
            .iter_mut()
            .find(|u| u.table == "tags")
            .unwrap();
        tags.after_copy.push(PlanStatement {
            kind: StatementKind::CreateIndex,
            table: Some("tags".into()),
            sql: "CREATE INDEX broken ON no_such_table (x)".into(),
            description: "Create index 'broken'".into(),
        });

        let options = ExecutorOptions {
            continue_on_error: true,
            ..Default::default()
        };
        let result = MigrationExecutor::new(options)
            .execute(&plan, source.clone(), target.clone(), CancellationToken::new(), false)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.failed_tables, vec!["tags".to_string()]);
        assert_eq!(result.tables_processed, 2);
        assert_eq!(count(target.as_ref(), "users").await, 3);
        let tags = target
            .query("SELECT name FROM sqlite_master WHERE name = 'tags'", &[])
            .await
            .unwrap();
        assert!(tags.is_empty());

        // No history entry for a failed run.
        let history = HistoryTable::new(DialectKind::Sqlite, "main", "_schema_migrations");
        assert!(history.entries(target.as_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast_with_nothing_applied_is_an_error() {
        let source = make_test_source().await;
        let target: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
        let mut plan = make_test_plan(source.as_ref(), target.as_ref(), PlanOptions::default()).await;
        plan.migrations[0].statements[0].sql = "CREATE TABLE (".into();

        let err = MigrationExecutor::default()
            .execute(&plan, source, target, CancellationToken::new(), false)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_partial_result() {
        let source = make_test_source().await;
        let target: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
        let plan = make_test_plan(source.as_ref(), target.as_ref(), PlanOptions::default()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = MigrationExecutor::default()
            .execute(&plan, source, target, cancel, false)
            .await
            .unwrap();
        assert!(result.cancelled);
        assert!(!result.success);
        assert_eq!(result.tables_processed, 0);
    }

    #[tokio::test]
    async fn test_lock_held_elsewhere() {
        let source = make_test_source().await;
        let target: Arc<dyn DatabaseHandle> = Arc::new(SqliteHandle::memory().await.unwrap());
        let plan = make_test_plan(source.as_ref(), target.as_ref(), PlanOptions::default()).await;
        let held = target
            .try_acquire_migration_lock("_schema_migration_lock")
            .await
            .unwrap()
            .unwrap();

        let options = ExecutorOptions {
            lock_attempts: 2,
            lock_retry_ms: 1,
            ..Default::default()
        };
        let err = MigrationExecutor::new(options)
            .execute(&plan, source, target, CancellationToken::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::LockAcquisition { attempts: 2, .. }));
        assert_eq!(err.exit_code(), 4);
        held.release().await.unwrap();
    }

    #[test]
    fn test_components_follow_foreign_keys() {
        let unit = |name: &str, deps: &[&str]| TableUnit {
            table: name.to_string(),
            action: UnitAction::Create,
            statements: Vec::new(),
            copy: None,
            after_copy: Vec::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        };
        let units = [
            unit("users", &[]),
            unit("tags", &[]),
            unit("posts", &["users"]),
            unit("comments", &["posts", "users"]),
            unit("audit", &["elsewhere"]),
        ];
        let refs: Vec<&TableUnit> = units.iter().collect();
        assert_eq!(components(&refs), vec![vec![0, 2, 3], vec![1], vec![4]]);
    }
}

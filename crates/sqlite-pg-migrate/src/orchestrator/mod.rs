//! Migration orchestrator - main workflow coordinator.
//!
//! Wires discovery, comparison, planning and execution together. Every
//! component is built here and handed its collaborators explicitly; none of
//! them keeps state between calls.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::advisor::IndexAdvisor;
use crate::compare::{compare, ComparisonResult};
use crate::config::Config;
use crate::core::schema::SchemaModel;
use crate::core::traits::DatabaseHandle;
use crate::discovery::DiscoveryCoordinator;
use crate::drivers;
use crate::error::Result;
use crate::executor::{ExecutorOptions, HistoryEntry, HistoryTable, MigrationExecutor, MigrationResult};
use crate::planner::{MigrationPlan, MigrationPlanner, PlanOptions};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn DatabaseHandle>,
    target: Arc<dyn DatabaseHandle>,
    coordinator: DiscoveryCoordinator,
    advisor: Arc<IndexAdvisor>,
}

/// Connectivity of both databases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source: String,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target: String,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
}

/// Whether the current plan has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    /// The target already matches; nothing to run.
    UpToDate,
    /// A history entry carries the current plan's checksum.
    Applied,
    Pending,
}

/// Applied history plus the state of the current plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub history_table: String,
    pub applied: Vec<HistoryEntry>,
    pub plan_checksum: String,
    pub state: PlanState,
    pub pending_statements: usize,
    pub pending_copies: usize,
}

impl MigrationStatus {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Orchestrator {
    /// Connect to both databases named in `config`.
    pub async fn new(config: Config) -> Result<Self> {
        info!(
            "Connecting: source={} target={}",
            config.source.describe(),
            config.target.describe()
        );
        let source = drivers::connect(&config.source).await?;
        let target = drivers::connect(&config.target).await?;
        Ok(Self::with_handles(config, source, target))
    }

    /// Use handles opened elsewhere.
    pub fn with_handles(
        config: Config,
        source: Arc<dyn DatabaseHandle>,
        target: Arc<dyn DatabaseHandle>,
    ) -> Self {
        let advisor = Arc::new(IndexAdvisor::new(config.advisor.clone()));
        Self {
            config,
            source,
            target,
            coordinator: DiscoveryCoordinator::with_builtins(),
            advisor,
        }
    }

    /// Share a query-stat feed with the application.
    pub fn with_advisor(mut self, advisor: Arc<IndexAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn advisor(&self) -> &Arc<IndexAdvisor> {
        &self.advisor
    }

    pub fn source(&self) -> &Arc<dyn DatabaseHandle> {
        &self.source
    }

    pub fn target(&self) -> &Arc<dyn DatabaseHandle> {
        &self.target
    }

    pub async fn discover_source(&self) -> Result<SchemaModel> {
        self.coordinator
            .discover(self.source.as_ref(), &self.config.discovery)
            .await
    }

    pub async fn discover_target(&self) -> Result<SchemaModel> {
        self.coordinator
            .discover(self.target.as_ref(), &self.config.discovery)
            .await
    }

    /// What the target lacks or has in excess relative to the source.
    pub async fn compare(&self) -> Result<ComparisonResult> {
        let source = self.discover_source().await?;
        let target = self.discover_target().await?;
        Ok(compare(&target, &source))
    }

    /// Discover both sides and plan.
    pub async fn plan(&self, dry_run: bool) -> Result<MigrationPlan> {
        let source = self.discover_source().await?;
        let target = self.discover_target().await?;
        self.plan_models(&source, &target, dry_run)
    }

    fn plan_models(&self, source: &SchemaModel, target: &SchemaModel, dry_run: bool) -> Result<MigrationPlan> {
        let comparison = compare(target, source);
        let recommendations = self.advisor.recommend(Some(source));
        let options = PlanOptions {
            dry_run,
            enforce_foreign_keys: self.target.enforces_foreign_keys(),
            ..PlanOptions::from_config(&self.config.migration, &self.config.discovery)
        };
        let mut plan = MigrationPlanner::new(options).plan(&comparison, source, target, &recommendations)?;

        // Discovery already logged these; carry them into the report.
        let discovered: Vec<String> = source
            .warnings
            .iter()
            .map(|w| format!("source: {}", w))
            .chain(target.warnings.iter().map(|w| format!("target: {}", w)))
            .collect();
        plan.warnings.splice(0..0, discovered);
        Ok(plan)
    }

    fn executor(&self) -> MigrationExecutor {
        MigrationExecutor::new(ExecutorOptions::from_config(&self.config.migration))
    }

    /// The SQL a run would send, in order.
    pub async fn generate_sql(&self) -> Result<Vec<String>> {
        let plan = self.plan(true).await?;
        self.executor().generate_sql(&plan, self.source.clone()).await
    }

    /// Run the migration. Table failures are reported in the result.
    pub async fn run(&self, cancel: CancellationToken, dry_run: bool) -> Result<MigrationResult> {
        let started = Instant::now();
        info!("Starting migration run (config {})", &self.config.hash()[..12]);

        info!("Phase 1: discovering source schema");
        let source = self.discover_source().await?;
        info!(
            "Found {} table(s), {} view(s) in {}",
            source.base_tables().count(),
            source.views().count(),
            self.config.source.describe()
        );

        info!("Phase 2: discovering target schema");
        let target = self.discover_target().await?;

        info!("Phase 3: planning");
        let plan = self.plan_models(&source, &target, dry_run)?;
        for note in &plan.optimizations {
            info!("  {}", note);
        }

        if dry_run {
            info!("Phase 4: rendering SQL (dry run)");
        } else {
            info!("Phase 4: executing {} table unit(s)", plan.migrations.len());
        }
        let result = self
            .executor()
            .execute(&plan, self.source.clone(), self.target.clone(), cancel, dry_run)
            .await?;

        info!("Finished in {:.2}s", started.elapsed().as_secs_f64());
        Ok(result)
    }

    /// Applied history and whether the current plan is pending.
    pub async fn status(&self) -> Result<MigrationStatus> {
        let plan = self.plan(true).await?;
        let history = HistoryTable::new(
            self.target.dialect(),
            self.target.namespace(),
            self.config.migration.history_table.clone(),
        );
        let applied = history.entries(self.target.as_ref()).await?;

        let state = if plan.is_empty() {
            PlanState::UpToDate
        } else if applied.iter().any(|e| e.checksum == plan.checksum) {
            PlanState::Applied
        } else {
            PlanState::Pending
        };

        Ok(MigrationStatus {
            history_table: history.name().to_string(),
            applied,
            plan_checksum: plan.checksum.clone(),
            state,
            pending_statements: plan.estimated_impact.statement_count,
            pending_copies: plan.estimated_impact.tables_copied,
        })
    }

    /// Round-trip a trivial query on both databases.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let (source_connected, source_latency_ms, source_error) = ping(self.source.as_ref()).await;
        let (target_connected, target_latency_ms, target_error) = ping(self.target.as_ref()).await;
        Ok(HealthCheckResult {
            healthy: source_connected && target_connected,
            source: self.config.source.describe(),
            source_connected,
            source_latency_ms,
            source_error,
            target: self.config.target.describe(),
            target_connected,
            target_latency_ms,
            target_error,
        })
    }

    /// Close both pools.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}

async fn ping(db: &dyn DatabaseHandle) -> (bool, u64, Option<String>) {
    let start = Instant::now();
    match db.query("SELECT 1 AS ok", &[]).await {
        Ok(_) => (true, start.elapsed().as_millis() as u64, None),
        Err(e) => (false, start.elapsed().as_millis() as u64, Some(e.to_string())),
    }
}

//! # sqlite-pg-migrate
//!
//! Dialect-neutral schema discovery, comparison and migration between SQLite
//! and PostgreSQL.
//!
//! - **Discovery** introspects either engine into one canonical
//!   [`SchemaModel`]
//! - **Comparison** diffs two models into typed, severity-ranked differences
//! - **Planning** orders DDL by foreign keys, breaks reference cycles and
//!   substitutes capability fallbacks
//! - **Execution** applies one transaction per table, copies rows in bounded
//!   batches, and renders the identical SQL in dry-run mode
//! - **Index advice** turns recorded query timings into ranked index
//!   suggestions
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_pg_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(CancellationToken::new(), false).await?;
//!     println!("Migrated {} rows", result.rows_migrated);
//!     Ok(())
//! }
//! ```

pub mod advisor;
pub mod compare;
pub mod config;
pub mod core;
pub mod dialect;
pub mod discovery;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod planner;

// Re-exports for convenient access
pub use advisor::{IndexAdvisor, IndexRecommendation};
pub use compare::{compare, ComparisonResult, Difference, DifferenceKind, Severity};
pub use config::{Config, ConnectionConfig, DiscoveryConfig, MigrationConfig, TargetMode};
pub use core::{Capabilities, DatabaseHandle, DialectKind, Row, SchemaModel, SqlValue, Table};
pub use discovery::DiscoveryCoordinator;
pub use error::{MigrateError, Result};
pub use executor::{ExecutorOptions, MigrationExecutor, MigrationResult};
pub use orchestrator::{HealthCheckResult, MigrationStatus, Orchestrator, PlanState};
pub use planner::{MigrationPlan, MigrationPlanner, PlanOptions};

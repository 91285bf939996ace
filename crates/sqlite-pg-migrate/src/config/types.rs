//! Configuration type definitions with auto-tuning based on system resources.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use sysinfo::System;
use tracing::info;

use crate::core::capability::DialectKind;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database whose schema and data are the desired state.
    pub source: ConnectionConfig,

    /// Database brought into alignment with the source.
    pub target: ConnectionConfig,

    /// Discovery filters.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Index recommendation thresholds.
    #[serde(default)]
    pub advisor: AdvisorConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// Connection settings for either side of a migration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Engine: `sqlite` or `postgres` (aliases accepted).
    #[serde(deserialize_with = "deserialize_dialect")]
    pub dialect: DialectKind,

    /// Database file for SQLite. `:memory:` opens a private in-memory database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Database host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Namespace to introspect. Defaults to `main` / `public`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// SSL mode (default: "disable").
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Pool size. Auto-tuned from workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// Enforce SQLite foreign keys on this connection (default: false, so
    /// tables can be loaded in any order).
    #[serde(default)]
    pub enforce_foreign_keys: bool,
}

impl ConnectionConfig {
    /// SQLite connection to a file.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            dialect: DialectKind::Sqlite,
            path: Some(path.into()),
            host: default_host(),
            port: default_pg_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            schema: None,
            ssl_mode: default_ssl_mode(),
            max_connections: None,
            enforce_foreign_keys: false,
        }
    }

    /// Namespace to use, falling back to the dialect default.
    pub fn namespace(&self) -> &str {
        self.schema
            .as_deref()
            .unwrap_or_else(|| self.dialect.default_namespace())
    }

    /// Human-readable location, without credentials.
    pub fn describe(&self) -> String {
        match self.dialect {
            DialectKind::Sqlite => format!("sqlite:{}", self.path.as_deref().unwrap_or("?")),
            DialectKind::Postgres => format!(
                "postgres://{}:{}/{}",
                self.host, self.port, self.database
            ),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("dialect", &self.dialect)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("enforce_foreign_keys", &self.enforce_foreign_keys)
            .finish()
    }
}

/// Discovery filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Tables to skip (glob patterns, case-insensitive).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Discover views (default: true).
    #[serde(default = "default_true")]
    pub include_views: bool,

    /// Native type → canonical type overrides, e.g. `geometry: text`.
    #[serde(default)]
    pub custom_type_mappings: BTreeMap<String, String>,

    /// Include the migration history and lock tables (default: false).
    #[serde(default)]
    pub include_internal_tables: bool,

    /// Names of the internal tables to hide. Filled from the migration
    /// section by the orchestrator.
    #[serde(skip)]
    pub internal_tables: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            exclude_tables: Vec::new(),
            include_views: true,
            custom_type_mappings: BTreeMap::new(),
            include_internal_tables: false,
            internal_tables: vec![default_history_table(), default_lock_table()],
        }
    }
}

/// Migration behavior configuration.
/// Performance-related fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per read window and INSERT batch (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Run tables without a foreign-key relationship concurrently.
    #[serde(default)]
    pub parallel: bool,

    /// Concurrent table workers. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Drop target tables absent from the source. Destructive; never implied.
    #[serde(default)]
    pub drop_tables: bool,

    /// Record per-table failures and continue instead of failing fast.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Skip all data-copy tasks.
    #[serde(default)]
    pub schema_only: bool,

    /// Tables to include (glob patterns). Empty means all.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (glob patterns).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// How tables that already exist on the target receive data.
    #[serde(default)]
    pub target_mode: TargetMode,

    /// Migration history table (default: "_schema_migrations").
    #[serde(default = "default_history_table")]
    pub history_table: String,

    /// Lock table for PostgreSQL targets (default: "_schema_migration_lock").
    #[serde(default = "default_lock_table")]
    pub lock_table: String,

    /// Lock acquisition attempts before giving up (default: 5).
    #[serde(default = "default_lock_attempts")]
    pub lock_attempts: u32,

    /// First retry delay in milliseconds; doubled on each attempt (default: 250).
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,

    /// Turn index recommendations into post-hook CREATE INDEX statements.
    #[serde(default)]
    pub apply_index_recommendations: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            parallel: false,
            workers: None,
            drop_tables: false,
            continue_on_error: false,
            schema_only: false,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            target_mode: TargetMode::default(),
            history_table: default_history_table(),
            lock_table: default_lock_table(),
            lock_attempts: default_lock_attempts(),
            lock_retry_ms: default_lock_retry_ms(),
            apply_index_recommendations: false,
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        // Workers: cores - 2, but at least 2 and at most 16
        if self.workers.is_none() {
            let workers = resources.cpu_cores.saturating_sub(2).clamp(2, 16);
            self.workers = Some(workers);
        }

        info!(
            "Auto-tuned config: workers={}, batch_size={}",
            self.get_workers(),
            self.batch_size
        );

        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(4)
    }
}

/// How data reaches tables that already exist on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// Copy only into tables the plan creates.
    #[default]
    CreateMissing,

    /// Empty existing tables, then copy into them.
    Truncate,

    /// INSERT new rows, UPDATE rows whose primary key already exists.
    Upsert,
}

/// Index recommendation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Executions of a query shape before it is considered (default: 10).
    #[serde(default = "default_min_frequency")]
    pub min_frequency: u64,

    /// Average execution time in ms above which a shape is slow (default: 100).
    #[serde(default = "default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: f64,

    /// Distinct shapes kept before new ones are dropped (default: 10000).
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            min_frequency: default_min_frequency(),
            slow_query_threshold_ms: default_slow_query_threshold_ms(),
            max_patterns: default_max_patterns(),
        }
    }
}

fn deserialize_dialect<'de, D>(deserializer: D) -> std::result::Result<DialectKind, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    DialectKind::from_name(&name).map_err(serde::de::Error::custom)
}

// Default value functions for serde
fn default_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    500
}

pub(crate) fn default_history_table() -> String {
    "_schema_migrations".to_string()
}

pub(crate) fn default_lock_table() -> String {
    "_schema_migration_lock".to_string()
}

fn default_lock_attempts() -> u32 {
    5
}

fn default_lock_retry_ms() -> u64 {
    250
}

fn default_min_frequency() -> u64 {
    10
}

fn default_slow_query_threshold_ms() -> f64 {
    100.0
}

fn default_max_patterns() -> usize {
    10_000
}

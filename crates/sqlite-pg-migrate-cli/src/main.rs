//! sqlite-pg-migrate CLI - schema discovery, comparison and migration between
//! SQLite and PostgreSQL.

use clap::{Parser, Subcommand};
use sqlite_pg_migrate::{Config, MigrateError, Orchestrator, PlanState};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Compare found schemas that cannot be reconciled without breaking changes.
const EXIT_INCOMPATIBLE: u8 = 2;
/// A run finished with table errors or was cancelled.
const EXIT_RUN_FAILED: u8 = 3;

#[derive(Parser)]
#[command(name = "sqlite-pg-migrate")]
#[command(about = "Schema discovery, comparison and migration between SQLite and PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical schema of the source (or target) database
    Discover {
        /// Discover the target instead of the source
        #[arg(long)]
        target: bool,
    },

    /// Compare source and target schemas
    Compare,

    /// Print the SQL a run would execute
    Plan,

    /// Migrate the target to match the source
    Run {
        /// Render SQL without touching the target
        #[arg(long)]
        dry_run: bool,

        /// Drop target tables that are absent from the source
        #[arg(long)]
        drop_tables: bool,

        /// Create and alter tables without copying rows
        #[arg(long)]
        schema_only: bool,

        /// Run tables without foreign-key links concurrently
        #[arg(long)]
        parallel: bool,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show applied migrations and whether the current plan is pending
    Status,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!("Loaded configuration from {:?}", cli.config);

    let cancel_token = setup_signal_handler(cli.shutdown_timeout).await?;

    match cli.command {
        Commands::Discover { target } => {
            let orchestrator = Orchestrator::new(config).await?;
            let model = if target {
                orchestrator.discover_target().await?
            } else {
                orchestrator.discover_source().await?
            };

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&model)?);
            } else {
                println!("{} schema '{}':", model.dialect, model.namespace);
                for table in &model.tables {
                    let kind = if table.is_view { "view" } else { "table" };
                    println!("  {} {} ({} columns)", kind, table.name, table.columns.len());
                    for col in &table.columns {
                        println!(
                            "    {} {}{}",
                            col.name,
                            col.canonical_type,
                            if col.is_nullable { "" } else { " NOT NULL" }
                        );
                    }
                }
                for w in &model.warnings {
                    println!("  warning: {}", w);
                }
            }
            orchestrator.close().await;
            Ok(0)
        }

        Commands::Compare => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.compare().await?;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else if result.is_empty() {
                println!("Schemas match.");
            } else {
                println!(
                    "{} difference(s): {} breaking, {} informational",
                    result.summary.total, result.summary.breaking, result.summary.informational
                );
                for diff in &result.differences {
                    println!("  [{:?}] {}", diff.severity, diff.message);
                }
            }
            Ok(if result.compatible { 0 } else { EXIT_INCOMPATIBLE })
        }

        Commands::Plan => {
            let orchestrator = Orchestrator::new(config).await?;
            if cli.output_json {
                let plan = orchestrator.plan(true).await?;
                println!("{}", plan.to_json()?);
            } else {
                for sql in orchestrator.generate_sql().await? {
                    println!("{};", sql);
                }
            }
            orchestrator.close().await;
            Ok(0)
        }

        Commands::Run {
            dry_run,
            drop_tables,
            schema_only,
            parallel,
            workers,
            batch_size,
        } => {
            // Flags can only switch behavior on.
            config.migration.drop_tables |= drop_tables;
            config.migration.schema_only |= schema_only;
            config.migration.parallel |= parallel;
            if let Some(w) = workers {
                config.migration.workers = Some(w);
            }
            if let Some(b) = batch_size {
                config.migration.batch_size = b;
            }
            config.validate()?;

            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.run(cancel_token, dry_run).await;
            orchestrator.close().await;
            let result = result?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                if dry_run {
                    for sql in &result.statements {
                        println!("{};", sql);
                    }
                }
                let status_msg = if result.cancelled {
                    "Migration cancelled."
                } else if !result.success {
                    "Migration finished with errors."
                } else if dry_run {
                    "Dry run completed!"
                } else {
                    "Migration completed!"
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!("  Tables: {}", result.tables_processed);
                println!("  Rows: {}", result.rows_migrated);
                println!("  Schema changes: {}", result.summary.schema_change_count);
                for change in &result.summary.schema_changes {
                    println!("    {}", change);
                }
                for w in &result.warnings {
                    println!("  Warning: {}", w);
                }
                if !result.failed_tables.is_empty() {
                    println!("  Failed tables: {:?}", result.failed_tables);
                    for e in &result.errors {
                        println!("    {}", e);
                    }
                }
            }
            Ok(if result.success { 0 } else { EXIT_RUN_FAILED })
        }

        Commands::Status => {
            let orchestrator = Orchestrator::new(config).await?;
            let status = orchestrator.status().await?;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", status.to_json()?);
            } else {
                println!("History table: {}", status.history_table);
                for entry in &status.applied {
                    println!(
                        "  {}  {}  {} statements, {} rows  {}",
                        entry.applied_at,
                        entry.id,
                        entry.statements,
                        entry.rows_migrated,
                        &entry.checksum[..entry.checksum.len().min(12)]
                    );
                }
                let state = match status.state {
                    PlanState::UpToDate => "up to date",
                    PlanState::Applied => "applied",
                    PlanState::Pending => "pending",
                };
                println!(
                    "Current plan {}: {} ({} statements, {} copies)",
                    &status.plan_checksum[..status.plan_checksum.len().min(12)],
                    state,
                    status.pending_statements,
                    status.pending_copies
                );
            }
            Ok(0)
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await?;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    result.source,
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target ({}): {} ({}ms)",
                    result.target,
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::pool("health check failed", "health-check"));
            }
            Ok(0)
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    // Logs go to stderr so stdout stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Cancel on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Rolling back the current table and stopping (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();

        tokio::time::sleep(std::time::Duration::from_secs(shutdown_timeout)).await;
        eprintln!("Shutdown timeout elapsed; exiting.");
        std::process::exit(i32::from(EXIT_RUN_FAILED));
    });

    Ok(cancel_token)
}

/// Cancel on Ctrl-C.
#[cfg(not(unix))]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
            tokio::time::sleep(std::time::Duration::from_secs(shutdown_timeout)).await;
            std::process::exit(i32::from(EXIT_RUN_FAILED));
        }
    });

    Ok(cancel_token)
}

//! CLI integration tests for sqlite-pg-migrate.
//!
//! Argument parsing, help output and exit codes, plus end-to-end runs
//! between two SQLite files in a temp directory.

use assert_cmd::Command;
use predicates::prelude::*;
use sqlite_pg_migrate::drivers::SqliteHandle;
use sqlite_pg_migrate::DatabaseHandle;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a command for the sqlite-pg-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("sqlite-pg-migrate").unwrap()
}

/// Source and target database files plus a config pointing at them.
struct Fixture {
    _dir: TempDir,
    config: PathBuf,
    target: PathBuf,
}

fn seed_source(path: &Path) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let db = SqliteHandle::open(path.to_str().unwrap(), false, 1)
            .await
            .unwrap();
        db.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL UNIQUE, age INTEGER)",
            &[],
        )
        .await
        .unwrap();
        db.execute(
            "INSERT INTO users (id, email, age) VALUES (1, 'a@x.io', 31), (2, 'b@x.io', NULL), (3, 'c@x.io', 45)",
            &[],
        )
        .await
        .unwrap();
        db.close().await;
    });
}

fn make_fixture(extra_yaml: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.db");
    let target = dir.path().join("target.db");
    seed_source(&source);

    let config = dir.path().join("config.yaml");
    let mut file = std::fs::File::create(&config).unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  dialect: sqlite").unwrap();
    writeln!(file, "  path: {}", source.display()).unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  dialect: sqlite").unwrap();
    writeln!(file, "  path: {}", target.display()).unwrap();
    write!(file, "{}", extra_yaml).unwrap();

    Fixture {
        _dir: dir,
        config,
        target,
    }
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("compare"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--drop-tables"))
        .stdout(predicate::str::contains("--schema-only"))
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--batch-size"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sqlite-pg-migrate"));
}

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--shutdown-timeout"))
        .stdout(predicate::str::contains("[default: 60]"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 1)
// =============================================================================

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_dialect_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  dialect: oracle").unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  dialect: sqlite").unwrap();
    writeln!(file, "  path: /tmp/never-opened.db").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "discover"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("oracle"));
}

#[test]
fn test_same_database_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  dialect: sqlite").unwrap();
    writeln!(file, "  path: /tmp/app.db").unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  dialect: sqlite").unwrap();
    writeln!(file, "  path: /tmp/app.db").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("same database"));
}

#[test]
fn test_zero_batch_size_override_exits_with_code_1() {
    let fixture = make_fixture("");
    cmd()
        .args(["--config", fixture.config.to_str().unwrap()])
        .args(["run", "--batch-size", "0"])
        .assert()
        .code(1);
}

// =============================================================================
// End-to-end Tests
// =============================================================================

#[test]
fn test_compare_reports_missing_table_with_code_2() {
    let fixture = make_fixture("");
    cmd()
        .args(["--config", fixture.config.to_str().unwrap(), "compare"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("'users' is missing"));
}

#[test]
fn test_plan_prints_sql_without_touching_target() {
    let fixture = make_fixture("");
    cmd()
        .args(["--config", fixture.config.to_str().unwrap(), "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CREATE TABLE \"users\""))
        .stdout(predicate::str::contains("INSERT INTO \"users\""));

    cmd()
        .args(["--config", fixture.config.to_str().unwrap()])
        .args(["discover", "--target", "--output-json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"tables\": []"));
}

#[test]
fn test_run_then_compare_and_status() {
    let fixture = make_fixture("migration:\n  batch_size: 2\n");
    let config = fixture.config.to_str().unwrap();

    cmd()
        .args(["--config", config, "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Migration completed!"))
        .stdout(predicate::str::contains("Rows: 3"));
    assert!(fixture.target.exists());

    cmd()
        .args(["--config", config, "compare"])
        .assert()
        .success();

    cmd()
        .args(["--config", config, "--output-json", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"up_to_date\""));
}

#[test]
fn test_dry_run_output_json() {
    let fixture = make_fixture("");
    cmd()
        .args(["--config", fixture.config.to_str().unwrap()])
        .args(["--output-json", "run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dry_run\": true"))
        .stdout(predicate::str::contains("CREATE TABLE"));

    cmd()
        .args(["--config", fixture.config.to_str().unwrap(), "compare"])
        .assert()
        .code(2);
}

#[test]
fn test_health_check_sqlite_files() {
    let fixture = make_fixture("");
    cmd()
        .args(["--config", fixture.config.to_str().unwrap(), "health-check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("HEALTHY"));
}

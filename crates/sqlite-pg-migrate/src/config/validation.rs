//! Configuration validation.

use globset::Glob;

use super::{Config, ConnectionConfig};
use crate::core::DialectKind;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("source", &config.source)?;
    validate_connection("target", &config.target)?;

    // Cannot migrate to the same database
    if same_database(&config.source, &config.target) {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    let migration = &config.migration;
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if migration.lock_attempts == 0 {
        return Err(MigrateError::Config(
            "migration.lock_attempts must be at least 1".into(),
        ));
    }
    if migration.history_table.trim().is_empty() {
        return Err(MigrateError::Config(
            "migration.history_table cannot be empty".into(),
        ));
    }

    for (field, patterns) in [
        ("migration.include_tables", &migration.include_tables),
        ("migration.exclude_tables", &migration.exclude_tables),
        ("discovery.exclude_tables", &config.discovery.exclude_tables),
    ] {
        for pattern in patterns {
            Glob::new(pattern).map_err(|e| {
                MigrateError::Config(format!("{}: invalid pattern '{}': {}", field, pattern, e))
            })?;
        }
    }

    if config.advisor.min_frequency == 0 {
        return Err(MigrateError::Config(
            "advisor.min_frequency must be at least 1".into(),
        ));
    }

    Ok(())
}

fn validate_connection(side: &str, conn: &ConnectionConfig) -> Result<()> {
    match conn.dialect {
        DialectKind::Sqlite => {
            if conn.path.as_deref().map_or(true, |p| p.trim().is_empty()) {
                return Err(MigrateError::Config(format!("{}.path is required", side)));
            }
        }
        DialectKind::Postgres => {
            if conn.host.is_empty() {
                return Err(MigrateError::Config(format!("{}.host is required", side)));
            }
            if conn.database.is_empty() {
                return Err(MigrateError::Config(format!(
                    "{}.database is required",
                    side
                )));
            }
            if conn.user.is_empty() {
                return Err(MigrateError::Config(format!("{}.user is required", side)));
            }
            crate::drivers::postgres::SslMode::parse(&conn.ssl_mode)?;
        }
    }
    if let Some(0) = conn.max_connections {
        return Err(MigrateError::Config(format!(
            "{}.max_connections must be at least 1",
            side
        )));
    }
    Ok(())
}

fn same_database(a: &ConnectionConfig, b: &ConnectionConfig) -> bool {
    if a.dialect != b.dialect {
        return false;
    }
    match a.dialect {
        DialectKind::Sqlite => {
            a.path == b.path && a.path.as_deref() != Some(":memory:")
        }
        DialectKind::Postgres => {
            a.host == b.host
                && a.port == b.port
                && a.database == b.database
                && a.namespace() == b.namespace()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdvisorConfig, DiscoveryConfig, MigrationConfig};

    fn valid_config() -> Config {
        let mut target = ConnectionConfig::sqlite("unused");
        target.dialect = DialectKind::Postgres;
        target.path = None;
        target.database = "target_db".to_string();
        target.user = "postgres".to_string();
        target.password = "password".to_string();

        Config {
            source: ConnectionConfig::sqlite("/tmp/source.db"),
            target,
            discovery: DiscoveryConfig::default(),
            migration: MigrationConfig::default(),
            advisor: AdvisorConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_sqlite_path() {
        let mut config = valid_config();
        config.source.path = None;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_target_database() {
        let mut config = valid_config();
        config.target.database = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_sqlite_file_rejected() {
        let mut config = valid_config();
        config.target = ConnectionConfig::sqlite("/tmp/source.db");
        assert!(validate(&config).is_err());

        config.source.path = Some(":memory:".into());
        config.target.path = Some(":memory:".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let mut config = valid_config();
        config.migration.include_tables = vec!["users[".into()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_ssl_mode_rejected() {
        let mut config = valid_config();
        config.target.ssl_mode = "sometimes".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_connection_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_456"),
            "Debug output should not contain actual password value"
        );
    }
}

//! Error types for the migration library.

use thiserror::Error;

/// Main error type for discovery, planning and migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dialect name has no registered introspector/normalizer pair
    #[error("Unsupported dialect '{0}' (supported: sqlite, postgres)")]
    UnsupportedDialect(String),

    /// An introspection query failed outright
    #[error("Discovery failed for {object}: {source}")]
    Discovery {
        object: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// The plan needs a construct the target cannot express
    #[error("Planning failed: {0}")]
    Planning(String),

    /// A table's unit of work failed and was rolled back
    #[error("Migration failed for table {table}: {message}")]
    MigrationExecution { table: String, message: String },

    /// Another migration holds the migration lock
    #[error("Could not acquire migration lock '{lock}' after {attempts} attempts")]
    LockAcquisition { lock: String, attempts: u32 },

    /// Table has no primary key (required for upsert mode)
    #[error("Table {0} has no primary key - upsert mode requires primary keys")]
    NoPrimaryKey(String),

    /// SQLite driver error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A value could not be converted for the target column
    #[error("Value encoding error: {0}")]
    Encode(String),

    /// IO error (file operations, lock files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(err: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: err.to_string(),
            context: context.into(),
        }
    }

    /// Wrap an introspection failure for the named object
    pub fn discovery(object: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::Discovery {
            object: object.into(),
            source: Box::new(source),
        }
    }

    /// Create a MigrationExecution error
    pub fn execution(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::MigrationExecution {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::UnsupportedDialect(_)
            | MigrateError::Yaml(_) => 1,
            MigrateError::MigrationExecution { .. } => 3,
            MigrateError::LockAcquisition { .. } => 4,
            _ => 5,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_error_keeps_cause() {
        let err = MigrateError::discovery(
            "table users",
            MigrateError::Config("connection reset".into()),
        );
        let detailed = err.format_detailed();
        assert!(detailed.contains("Discovery failed for table users"));
        assert!(detailed.contains("Caused by"));
        assert!(detailed.contains("connection reset"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 1);
        assert_eq!(MigrateError::UnsupportedDialect("oracle".into()).exit_code(), 1);
        assert_eq!(MigrateError::execution("t", "boom").exit_code(), 3);
        assert_eq!(
            MigrateError::LockAcquisition {
                lock: "l".into(),
                attempts: 3
            }
            .exit_code(),
            4
        );
        assert_eq!(MigrateError::Planning("x".into()).exit_code(), 5);
    }
}

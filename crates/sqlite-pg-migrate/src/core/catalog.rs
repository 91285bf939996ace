//! Driver catalog for explicit dependency injection.
//!
//! The [`DriverCatalog`] maps a [`DialectKind`] to its Introspector and
//! Normalizer pair. It is constructed by the caller and handed to the
//! discovery coordinator; there is no process-wide registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MigrateError, Result};

use super::capability::DialectKind;
use super::traits::{Introspector, Normalizer};

/// Introspector and Normalizer registered for one dialect.
#[derive(Clone)]
pub struct DriverPair {
    pub introspector: Arc<dyn Introspector>,
    pub normalizer: Arc<dyn Normalizer>,
}

/// Registry of introspection drivers keyed by dialect.
///
/// # Example
///
/// ```rust,ignore
/// let catalog = DriverCatalog::with_builtins();
/// let pair = catalog.require(DialectKind::Sqlite)?;
/// let tables = pair.introspector.list_tables(&*db, "main", true).await?;
/// ```
#[derive(Default, Clone)]
pub struct DriverCatalog {
    drivers: HashMap<DialectKind, DriverPair>,
}

impl DriverCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with the SQLite and PostgreSQL drivers registered.
    pub fn with_builtins() -> Self {
        use crate::drivers::{
            PostgresIntrospector, PostgresNormalizer, SqliteIntrospector, SqliteNormalizer,
        };

        let mut catalog = Self::new();
        catalog.register(
            Arc::new(SqliteIntrospector::new()),
            Arc::new(SqliteNormalizer::new()),
        );
        catalog.register(
            Arc::new(PostgresIntrospector::new()),
            Arc::new(PostgresNormalizer::new()),
        );
        catalog
    }

    /// Register an Introspector/Normalizer pair. Both must serve the same dialect.
    pub fn register(
        &mut self,
        introspector: Arc<dyn Introspector>,
        normalizer: Arc<dyn Normalizer>,
    ) {
        debug_assert_eq!(introspector.dialect(), normalizer.dialect());
        self.drivers.insert(
            introspector.dialect(),
            DriverPair {
                introspector,
                normalizer,
            },
        );
    }

    /// Get the pair for a dialect.
    pub fn get(&self, dialect: DialectKind) -> Option<&DriverPair> {
        self.drivers.get(&dialect)
    }

    /// Get the pair for a dialect, failing when none is registered.
    pub fn require(&self, dialect: DialectKind) -> Result<&DriverPair> {
        self.get(dialect)
            .ok_or_else(|| MigrateError::UnsupportedDialect(dialect.name().to_string()))
    }

    /// Registered dialects, sorted.
    pub fn dialects(&self) -> Vec<DialectKind> {
        let mut kinds: Vec<_> = self.drivers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for DriverCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverCatalog")
            .field("dialects", &self.dialects())
            .finish()
    }
}

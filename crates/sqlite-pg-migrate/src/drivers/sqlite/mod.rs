//! SQLite driver.
//!
//! - [`SqliteDialect`]: SQL syntax strategy for SQLite
//! - [`SqliteHandle`]: sqlx-pooled database handle with file-based migration lock
//! - [`SqliteIntrospector`]: `sqlite_master` and pragma queries
//! - [`SqliteNormalizer`]: affinity-based type and default normalization

mod dialect;
mod handle;
mod introspect;
mod normalize;

pub use dialect::SqliteDialect;
pub use handle::{SqliteHandle, MEMORY_PATH};
pub use introspect::SqliteIntrospector;
pub use normalize::SqliteNormalizer;

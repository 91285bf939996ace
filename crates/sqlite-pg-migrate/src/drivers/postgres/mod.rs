//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PostgresHandle`]: deadpool-postgres handle with a lock-table migration lock
//! - [`PostgresIntrospector`]: `pg_catalog` / `information_schema` queries
//! - [`PostgresNormalizer`]: cast stripping and sequence-default detection
//! - [`SslMode`]: rustls connector selection

mod dialect;
mod handle;
mod introspect;
mod normalize;
mod tls;
mod types;

pub use dialect::PostgresDialect;
pub use handle::PostgresHandle;
pub use introspect::PostgresIntrospector;
pub use normalize::PostgresNormalizer;
pub use tls::SslMode;

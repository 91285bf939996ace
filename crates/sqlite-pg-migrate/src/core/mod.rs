//! Core abstractions for dialect-neutral schema migration.
//!
//! - [`capability`]: dialect enum and static capability table
//! - [`schema`]: canonical schema model
//! - [`value`]: owned SQL values and rows
//! - [`traits`]: handle, introspector, normalizer and dialect traits
//! - [`catalog`]: introspection driver registry for dependency injection
//!
//! The core defines the seams; `drivers/sqlite` and `drivers/postgres`
//! implement them.

pub mod capability;
pub mod catalog;
pub mod schema;
pub mod traits;
pub mod value;

pub use capability::{Capabilities, DialectKind};
pub use catalog::{DriverCatalog, DriverPair};
pub use schema::{
    Cardinality, Column, DefaultValue, ForeignKey, Index, IndexPart, ReferentialAction,
    Relationship, SchemaModel, Table, ViewInfo,
};
pub use traits::{
    DatabaseHandle, Dialect, InsertColumn, Introspector, MigrationLockGuard, NormalizedDefault,
    Normalizer, RawColumn, RawForeignKey, RawIndex, RawRelationKind, RawTable, SelectColumn,
    SelectQueryOptions, TransactionHandle,
};
pub use value::{Row, SqlValue};

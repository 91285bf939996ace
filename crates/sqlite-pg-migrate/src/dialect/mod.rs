//! Canonical type vocabulary and per-dialect type converters.
//!
//! Types flow hub-and-spoke: a native type is converted to a
//! [`CanonicalType`] by the source dialect's [`ToCanonical`], and rendered for
//! the target by its [`FromCanonical`]. Two dialects need four converters,
//! not a mapper per pair.
//!
//! ```rust,ignore
//! let info = SqliteToCanonical::new().to_canonical("VARCHAR(50)", None, None, None);
//! let ddl = PostgresFromCanonical::new().from_canonical(&info.canonical_type);
//! assert_eq!(ddl.target_type, "varchar(50)");
//! ```

mod canonical;
mod typemap;

pub use canonical::{
    split_type_params, CanonicalType, CanonicalTypeInfo, FromCanonical, ToCanonical, TypeMapping,
};
pub use typemap::{
    PostgresFromCanonical, PostgresToCanonical, SqliteFromCanonical, SqliteToCanonical,
};

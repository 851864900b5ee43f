//! Flattening module
//!
//! Decomposes deeply nested, schema-drifting records into flat rows
//! across a set of relational tables linked by foreign keys.
//!
//! # Overview
//!
//! Scalars become columns of the current table. Nested objects and
//! arrays of objects become child tables; arrays of scalars are
//! serialized into a single column by default. Column types are
//! inferred from observed values and widened on conflict, never
//! narrowed, so upstream schema drift cannot corrupt or lose data.

mod engine;
mod types;

pub use engine::{FlattenConfig, Flattener, ScalarArrayMode};
pub use types::{ColumnDef, ColumnType, FlatRow, ParentLink, RowKey, SchemaChange, TableSchema};

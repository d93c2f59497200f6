//! Core abstractions for database-agnostic transfer.
//!
//! - [`schema`]: table and column metadata
//! - [`value`]: owned SQL values, rows and key tuples
//! - [`traits`]: database, connection and dialect traits implemented by drivers

pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnDef, Table, TablePair, TypeCategory};
pub use traits::{Connection, Database, Dialect, ScanPartition};
pub use value::{compare_keys, KeyTuple, Row, SqlNullType, SqlValue};

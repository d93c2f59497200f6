//! Core traits for database-agnostic copy and delete.
//!
//! - [`Database`]: a configured endpoint that hands out connections
//! - [`Connection`]: one session, owned by exactly one worker at a time
//! - [`Dialect`]: SQL syntax strategy for different database engines

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::catalog::ColumnCatalog;
use crate::error::Result;

use super::schema::{ColumnDef, Table};
use super::value::{KeyTuple, Row};

/// One natively partitioned slice of a source table.
///
/// Rows arrive in catalog column order; the channel closes once the slice is
/// drained. An `Err` item ends the slice.
#[derive(Debug)]
pub struct ScanPartition {
    /// Position of the slice within the table's partitioning.
    pub index: usize,
    /// Row stream.
    pub rows: mpsc::Receiver<Result<Row>>,
}

/// A configured database endpoint.
#[async_trait]
pub trait Database: Send + Sync {
    /// Short engine name for logs (`postgres`, `mysql`, `memory`).
    fn name(&self) -> &str;

    /// Whether `schema` holds engine-internal tables that are never migrated.
    fn is_system_schema(&self, schema: &str) -> bool;

    /// Maximum column-writes per commit, if the engine enforces one.
    fn mutation_limit(&self) -> Option<usize> {
        None
    }

    /// Open a new session. The caller owns it until it is dropped.
    async fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Release pooled resources.
    async fn close(&self) {}
}

/// A single database session.
///
/// Writes open a transaction implicitly. `commit` makes them durable,
/// `rollback` discards them, and dropping the connection without committing
/// discards them as well.
#[async_trait]
pub trait Connection: Send {
    /// Base tables, optionally restricted to one schema.
    async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<Table>>;

    /// Columns in ordinal order.
    async fn describe_columns(&mut self, table: &Table) -> Result<Vec<ColumnDef>>;

    /// Primary key column names in key order. Empty when the table has none.
    async fn primary_key(&mut self, table: &Table) -> Result<Vec<String>>;

    /// Number of indexes on the table, including the primary key index.
    async fn index_count(&mut self, table: &Table) -> Result<usize>;

    async fn count_rows(&mut self, table: &Table) -> Result<i64>;

    /// Rows `[offset, offset + limit)` in primary key order.
    async fn select_page(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Row>>;

    /// Primary key of the row at `offset` in key order, if there is one.
    async fn probe_key(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        offset: u64,
    ) -> Result<Option<KeyTuple>>;

    /// Up to `limit` keys matching the catalog's key range clause for
    /// `begin..=end`, in key order.
    async fn select_keys_in_range(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        begin: &KeyTuple,
        end: &KeyTuple,
        limit: u64,
    ) -> Result<Vec<KeyTuple>>;

    /// Natively partitioned scan of the whole table, when the engine has one.
    async fn partitioned_scan(
        &mut self,
        _table: &Table,
        _catalog: &ColumnCatalog,
    ) -> Result<Option<Vec<ScanPartition>>> {
        Ok(None)
    }

    /// Insert rows as one statement batch. Returns rows written.
    async fn insert(&mut self, table: &Table, catalog: &ColumnCatalog, rows: &[Row])
        -> Result<u64>;

    /// Delete rows by primary key as one statement batch. Returns rows deleted.
    async fn delete_keys(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        keys: &[KeyTuple],
    ) -> Result<u64>;

    /// Unconditional delete. Returns rows deleted.
    async fn delete_all(&mut self, table: &Table) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Switch the session between read-only and read-write.
    async fn set_read_only(&mut self, read_only: bool) -> Result<()>;
}

/// SQL syntax strategy for a database engine.
pub trait Dialect: Send + Sync {
    /// Dialect name (e.g., "postgres", "mysql").
    fn name(&self) -> &str;

    /// Quote an identifier.
    fn quote_ident(&self, name: &str) -> String;

    /// Positional parameter placeholder, 1-based.
    fn param_placeholder(&self, index: usize) -> String;

    /// Schema-qualified, quoted table reference.
    fn qualified_table(&self, table: &Table) -> String {
        if table.schema.is_empty() {
            self.quote_ident(&table.name)
        } else {
            format!(
                "{}.{}",
                self.quote_ident(&table.schema),
                self.quote_ident(&table.name)
            )
        }
    }

    /// Statement that switches the session's default access mode.
    fn read_only_statement(&self, read_only: bool) -> &'static str;

    /// Statement that opens a transaction.
    fn begin_statement(&self) -> &'static str {
        "BEGIN"
    }

    /// Query listing base tables. Takes the schema as parameter 1 when
    /// `with_schema` is set. Returns `(schema, name)` rows.
    fn tables_query(&self, with_schema: bool) -> String;

    /// Query returning `(name, data_type, max_length, is_nullable)` for
    /// schema = parameter 1, table = parameter 2.
    fn columns_query(&self) -> &'static str;

    /// Query returning primary key column names in key order for
    /// schema = parameter 1, table = parameter 2.
    fn primary_key_query(&self) -> &'static str;

    /// Query returning the index count for schema = parameter 1, table = parameter 2.
    fn index_count_query(&self) -> &'static str;
}

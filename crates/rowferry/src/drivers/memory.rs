//! In-process database used for tests and dry runs.
//!
//! Tables are kept sorted by primary key. Each connection buffers its writes
//! until `commit`, where the whole buffer is applied atomically or rejected.
//! Buffered writes are invisible to every session, including the one that
//! made them.
//!
//! A mutation limit, when set, is checked at commit: inserting a row costs
//! `columns + indexes` mutations, deleting a row by key costs `1 + indexes`,
//! and an unconditional delete costs one.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::catalog::ColumnCatalog;
use crate::core::{
    compare_keys, ColumnDef, Connection, Database, KeyTuple, Row, ScanPartition, SqlNullType,
    SqlValue, Table,
};
use crate::error::{MigrateError, Result};

const DRIVER: &str = "memory";
const SCAN_CHANNEL_CAPACITY: usize = 64;

type TableKey = (String, String);

fn key_of(table: &Table) -> TableKey {
    (table.schema.to_lowercase(), table.name.to_lowercase())
}

fn missing(table: &Table) -> MigrateError {
    MigrateError::driver(DRIVER, format!("table {} does not exist", table.full_name()))
}

#[derive(Debug, Clone)]
struct MemoryTable {
    table: Table,
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
    index_count: usize,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
    }

    fn key_positions(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|k| self.position(k))
            .collect()
    }

    fn key_of_row(&self, row: &Row) -> KeyTuple {
        self.key_positions()
            .into_iter()
            .map(|i| row[i].clone())
            .collect()
    }

    fn search(&self, key: &[SqlValue]) -> std::result::Result<usize, usize> {
        let positions = self.key_positions();
        self.rows.binary_search_by(|row| {
            positions
                .iter()
                .zip(key)
                .map(|(&i, k)| row[i].sort_cmp(k))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
    }

    /// Project a stored row onto catalog column order.
    fn project(&self, row: &Row, catalog: &ColumnCatalog) -> Row {
        catalog
            .columns()
            .iter()
            .map(|c| match self.position(&c.name) {
                Some(i) => row[i].clone(),
                None => SqlValue::Null(SqlNullType::String),
            })
            .collect()
    }

    /// Reorder a catalog-ordered row into storage order.
    fn store_order(&self, row: &Row, catalog: &ColumnCatalog) -> Result<Row> {
        if row.len() != catalog.column_count() {
            return Err(MigrateError::driver(
                DRIVER,
                format!(
                    "{}: row has {} values, expected {}",
                    self.table,
                    row.len(),
                    catalog.column_count()
                ),
            ));
        }
        let mut stored: Row = self
            .columns
            .iter()
            .map(|_| SqlValue::Null(SqlNullType::String))
            .collect();
        for (value, column) in row.iter().zip(catalog.columns()) {
            let i = self.position(&column.name).ok_or_else(|| {
                MigrateError::driver(
                    DRIVER,
                    format!("{} has no column {}", self.table, column.name),
                )
            })?;
            stored[i] = value.clone();
        }
        Ok(stored)
    }

    fn duplicate(&self, key: &KeyTuple) -> MigrateError {
        MigrateError::driver(
            DRIVER,
            format!(
                "duplicate primary key ({}) in {}",
                key.iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.table
            ),
        )
    }

    fn compare_rows(&self, positions: &[usize], a: &Row, b: &Row) -> Ordering {
        positions
            .iter()
            .map(|&i| a[i].sort_cmp(&b[i]))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    fn insert_sorted(&mut self, row: Row) -> Result<()> {
        // Keyless tables keep insertion order.
        if self.primary_key.is_empty() {
            self.rows.push(row);
            return Ok(());
        }
        let key = self.key_of_row(&row);
        match self.search(&key) {
            Ok(_) => Err(self.duplicate(&key)),
            Err(pos) => {
                self.rows.insert(pos, row);
                Ok(())
            }
        }
    }

    /// Append a batch and restore key order in one pass.
    fn insert_batch(&mut self, rows: Vec<Row>) -> Result<()> {
        if self.primary_key.is_empty() {
            self.rows.extend(rows);
            return Ok(());
        }
        for row in &rows {
            let key = self.key_of_row(row);
            if self.search(&key).is_ok() {
                return Err(self.duplicate(&key));
            }
        }
        self.rows.extend(rows);
        let positions = self.key_positions();
        let mut sorted = std::mem::take(&mut self.rows);
        sorted.sort_by(|a, b| self.compare_rows(&positions, a, b));
        self.rows = sorted;
        if let Some(pair) = self
            .rows
            .windows(2)
            .find(|w| self.compare_rows(&positions, &w[0], &w[1]).is_eq())
        {
            return Err(self.duplicate(&self.key_of_row(&pair[0])));
        }
        Ok(())
    }

    fn remove_keys(&mut self, keys: &[KeyTuple]) {
        let mut doomed: Vec<usize> = keys.iter().filter_map(|k| self.search(k).ok()).collect();
        doomed.sort_unstable();
        doomed.dedup();
        let mut doomed = doomed.into_iter().peekable();
        let mut index = 0;
        self.rows.retain(|_| {
            let remove = doomed.peek() == Some(&index);
            if remove {
                doomed.next();
            }
            index += 1;
            !remove
        });
    }

    /// Key tuples compare lexicographically, like the SQL row comparison.
    fn in_range(&self, row: &Row, begin: &KeyTuple, end: &KeyTuple) -> bool {
        let key = self.key_of_row(row);
        compare_keys(&key, begin).is_ge() && compare_keys(&key, end).is_le()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<TableKey, MemoryTable>,
    commits: u64,
    largest_commit: usize,
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Insert(TableKey, Vec<Row>),
    DeleteKeys(TableKey, Vec<KeyTuple>),
    DeleteAll(TableKey),
}

#[derive(Debug, Clone, Default)]
struct Settings {
    mutation_limit: Option<usize>,
    native_partitions: Option<usize>,
    latency: Option<Duration>,
    fail_inserts_after: Option<u64>,
}

/// An in-process database.
pub struct MemoryDatabase {
    name: String,
    state: Arc<Mutex<MemoryState>>,
    settings: Settings,
    system_schemas: Vec<String>,
    rows_inserted: Arc<AtomicU64>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
            settings: Settings::default(),
            system_schemas: vec!["information_schema".to_string()],
            rows_inserted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Reject commits carrying more than `limit` mutations.
    pub fn with_mutation_limit(mut self, limit: usize) -> Self {
        self.settings.mutation_limit = Some(limit);
        self
    }

    /// Serve whole-table scans as `partitions` concurrent streams.
    pub fn with_native_partitions(mut self, partitions: usize) -> Self {
        self.settings.native_partitions = Some(partitions.max(1));
        self
    }

    /// Delay every statement by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.settings.latency = Some(latency);
        self
    }

    pub fn with_system_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.system_schemas = schemas.into_iter().map(Into::into).collect();
        self
    }

    /// Fail every insert once `rows` rows have been inserted in total.
    pub fn fail_inserts_after(mut self, rows: u64) -> Self {
        self.settings.fail_inserts_after = Some(rows);
        self
    }

    /// Create an empty table. `index_count` includes the primary key index.
    pub async fn create_table(
        &self,
        schema: &str,
        name: &str,
        columns: Vec<ColumnDef>,
        primary_key: &[&str],
        index_count: usize,
    ) -> Table {
        let table = Table::new(schema, name);
        let entry = MemoryTable {
            table: table.clone(),
            columns,
            primary_key: primary_key.iter().map(|k| k.to_string()).collect(),
            index_count,
            rows: Vec::new(),
        };
        self.state.lock().await.tables.insert(key_of(&table), entry);
        table
    }

    /// Load rows in storage column order, bypassing transactions and limits.
    pub async fn insert_rows(&self, table: &Table, rows: Vec<Row>) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = state.tables.get_mut(&key_of(table)).ok_or_else(|| missing(table))?;
        for row in rows {
            entry.insert_sorted(row)?;
        }
        Ok(())
    }

    pub async fn row_count(&self, table: &Table) -> usize {
        let state = self.state.lock().await;
        state
            .tables
            .get(&key_of(table))
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Committed rows in key order.
    pub async fn rows(&self, table: &Table) -> Vec<Row> {
        let state = self.state.lock().await;
        state
            .tables
            .get(&key_of(table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Number of successful commits that carried writes.
    pub async fn commit_count(&self) -> u64 {
        self.state.lock().await.commits
    }

    /// Most mutations carried by a single successful commit.
    pub async fn largest_commit(&self) -> usize {
        self.state.lock().await.largest_commit
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_system_schema(&self, schema: &str) -> bool {
        self.system_schemas
            .iter()
            .any(|s| s.eq_ignore_ascii_case(schema))
    }

    fn mutation_limit(&self) -> Option<usize> {
        self.settings.mutation_limit
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            settings: self.settings.clone(),
            rows_inserted: Arc::clone(&self.rows_inserted),
            pending: Vec::new(),
            pending_mutations: 0,
            read_only: false,
        }))
    }
}

/// A session on a [`MemoryDatabase`].
pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    settings: Settings,
    rows_inserted: Arc<AtomicU64>,
    pending: Vec<PendingWrite>,
    pending_mutations: usize,
    read_only: bool,
}

impl MemoryConnection {
    async fn pause(&self) {
        if let Some(latency) = self.settings.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(MigrateError::driver(
                DRIVER,
                "cannot write in a read-only session",
            ));
        }
        Ok(())
    }

    async fn with_table<T>(&self, table: &Table, f: impl FnOnce(&MemoryTable) -> T) -> Result<T> {
        self.pause().await;
        let state = self.state.lock().await;
        let entry = state.tables.get(&key_of(table)).ok_or_else(|| missing(table))?;
        Ok(f(entry))
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<Table>> {
        self.pause().await;
        let state = self.state.lock().await;
        Ok(state
            .tables
            .values()
            .filter(|t| schema.map_or(true, |s| t.table.schema.eq_ignore_ascii_case(s)))
            .map(|t| t.table.clone())
            .collect())
    }

    async fn describe_columns(&mut self, table: &Table) -> Result<Vec<ColumnDef>> {
        self.with_table(table, |t| t.columns.clone()).await
    }

    async fn primary_key(&mut self, table: &Table) -> Result<Vec<String>> {
        self.with_table(table, |t| t.primary_key.clone()).await
    }

    async fn index_count(&mut self, table: &Table) -> Result<usize> {
        self.with_table(table, |t| t.index_count).await
    }

    async fn count_rows(&mut self, table: &Table) -> Result<i64> {
        self.with_table(table, |t| t.rows.len() as i64).await
    }

    async fn select_page(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Row>> {
        self.with_table(table, |t| {
            t.rows
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|r| t.project(r, catalog))
                .collect()
        })
        .await
    }

    async fn probe_key(
        &mut self,
        table: &Table,
        _catalog: &ColumnCatalog,
        offset: u64,
    ) -> Result<Option<KeyTuple>> {
        self.with_table(table, |t| t.rows.get(offset as usize).map(|r| t.key_of_row(r)))
            .await
    }

    async fn select_keys_in_range(
        &mut self,
        table: &Table,
        _catalog: &ColumnCatalog,
        begin: &KeyTuple,
        end: &KeyTuple,
        limit: u64,
    ) -> Result<Vec<KeyTuple>> {
        self.with_table(table, |t| {
            t.rows
                .iter()
                .filter(|r| t.in_range(r, begin, end))
                .take(limit as usize)
                .map(|r| t.key_of_row(r))
                .collect()
        })
        .await
    }

    async fn partitioned_scan(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
    ) -> Result<Option<Vec<ScanPartition>>> {
        let Some(partitions) = self.settings.native_partitions else {
            return Ok(None);
        };
        let rows: Vec<Row> = self
            .with_table(table, |t| t.rows.iter().map(|r| t.project(r, catalog)).collect())
            .await?;

        let share = rows.len().div_ceil(partitions).max(1);
        let mut chunks: Vec<Vec<Row>> = rows.chunks(share).map(|c| c.to_vec()).collect();
        chunks.resize_with(partitions, Vec::new);

        let latency = self.settings.latency;
        let scans = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
                tokio::spawn(async move {
                    for row in chunk {
                        if let Some(latency) = latency {
                            tokio::time::sleep(latency).await;
                        }
                        if tx.send(Ok(row)).await.is_err() {
                            break;
                        }
                    }
                });
                ScanPartition { index, rows: rx }
            })
            .collect();
        debug!("{}: native scan over {} partitions", table, partitions);
        Ok(Some(scans))
    }

    async fn insert(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        rows: &[Row],
    ) -> Result<u64> {
        self.check_writable()?;
        if rows.is_empty() {
            return Ok(0);
        }
        if let Some(limit) = self.settings.fail_inserts_after {
            let done = self.rows_inserted.load(AtomicOrdering::SeqCst);
            if done + rows.len() as u64 > limit {
                return Err(MigrateError::driver(
                    DRIVER,
                    format!("injected insert failure on {}", table),
                ));
            }
        }

        let (stored, cost) = self
            .with_table(table, |t| -> Result<(Vec<Row>, usize)> {
                let stored = rows
                    .iter()
                    .map(|r| t.store_order(r, catalog))
                    .collect::<Result<Vec<_>>>()?;
                if !t.primary_key.is_empty() {
                    if let Some(row) = stored.iter().find(|r| t.search(&t.key_of_row(r)).is_ok()) {
                        return Err(t.duplicate(&t.key_of_row(row)));
                    }
                }
                Ok((stored, rows.len() * (catalog.column_count() + t.index_count)))
            })
            .await??;

        self.rows_inserted
            .fetch_add(rows.len() as u64, AtomicOrdering::SeqCst);
        self.pending_mutations += cost;
        self.pending.push(PendingWrite::Insert(key_of(table), stored));
        Ok(rows.len() as u64)
    }

    async fn delete_keys(
        &mut self,
        table: &Table,
        _catalog: &ColumnCatalog,
        keys: &[KeyTuple],
    ) -> Result<u64> {
        self.check_writable()?;
        if keys.is_empty() {
            return Ok(0);
        }
        let (found, cost) = self
            .with_table(table, |t| {
                let found = keys.iter().filter(|k| t.search(k).is_ok()).count();
                (found, keys.len() * (1 + t.index_count))
            })
            .await?;
        self.pending_mutations += cost;
        self.pending
            .push(PendingWrite::DeleteKeys(key_of(table), keys.to_vec()));
        Ok(found as u64)
    }

    async fn delete_all(&mut self, table: &Table) -> Result<u64> {
        self.check_writable()?;
        let count = self.with_table(table, |t| t.rows.len()).await?;
        self.pending_mutations += 1;
        self.pending.push(PendingWrite::DeleteAll(key_of(table)));
        Ok(count as u64)
    }

    async fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.pause().await;
        let pending = std::mem::take(&mut self.pending);
        let mutations = std::mem::take(&mut self.pending_mutations);

        if let Some(limit) = self.settings.mutation_limit {
            if mutations > limit {
                return Err(MigrateError::driver(
                    DRIVER,
                    format!(
                        "transaction carries {} mutations, limit is {}",
                        mutations, limit
                    ),
                ));
            }
        }

        let mut state = self.state.lock().await;
        // Stage touched tables so a failing write leaves nothing applied.
        let mut staged: BTreeMap<TableKey, MemoryTable> = BTreeMap::new();
        for write in &pending {
            let key = match write {
                PendingWrite::Insert(k, _)
                | PendingWrite::DeleteKeys(k, _)
                | PendingWrite::DeleteAll(k) => k,
            };
            if !staged.contains_key(key) {
                let current = state.tables.get(key).cloned().ok_or_else(|| {
                    MigrateError::driver(DRIVER, format!("table {}.{} was dropped", key.0, key.1))
                })?;
                staged.insert(key.clone(), current);
            }
            let Some(target) = staged.get_mut(key) else {
                continue;
            };
            match write {
                PendingWrite::Insert(_, rows) => target.insert_batch(rows.clone())?,
                PendingWrite::DeleteKeys(_, keys) => target.remove_keys(keys),
                PendingWrite::DeleteAll(_) => target.rows.clear(),
            }
        }

        state.tables.extend(staged);
        state.commits += 1;
        state.largest_commit = state.largest_commit.max(mutations);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.pending.clear();
        self.pending_mutations = 0;
        Ok(())
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.read_only = read_only;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogPurpose;

    async fn people(db: &MemoryDatabase) -> (Table, ColumnCatalog) {
        let columns = vec![
            ColumnDef::new("id", "int8").not_null(),
            ColumnDef::new("name", "varchar").with_max_length(20),
        ];
        let table = db
            .create_table("app", "people", columns.clone(), &["id"], 1)
            .await;
        let catalog = ColumnCatalog::from_columns(
            table.clone(),
            CatalogPurpose::ForInsert,
            &columns,
            vec!["id".into()],
        );
        (table, catalog)
    }

    fn person(id: i64) -> Row {
        vec![SqlValue::I64(id), SqlValue::Text(format!("p{}", id))]
    }

    #[tokio::test]
    async fn test_writes_are_invisible_until_commit() {
        let db = MemoryDatabase::new("mem");
        let (table, catalog) = people(&db).await;
        let mut conn = db.connect().await.unwrap();

        conn.insert(&table, &catalog, &[person(2), person(1)]).await.unwrap();
        assert_eq!(conn.count_rows(&table).await.unwrap(), 0);
        conn.commit().await.unwrap();

        let rows = db.rows(&table).await;
        assert_eq!(rows, vec![person(1), person(2)]);
    }

    #[tokio::test]
    async fn test_dropped_connection_discards_writes() {
        let db = MemoryDatabase::new("mem");
        let (table, catalog) = people(&db).await;
        {
            let mut conn = db.connect().await.unwrap();
            conn.insert(&table, &catalog, &[person(1)]).await.unwrap();
        }
        assert_eq!(db.row_count(&table).await, 0);
    }

    #[tokio::test]
    async fn test_mutation_limit_rejects_commit() {
        // 3 mutations per row: 2 columns + 1 index
        let db = MemoryDatabase::new("mem").with_mutation_limit(10);
        let (table, catalog) = people(&db).await;
        let mut conn = db.connect().await.unwrap();

        conn.insert(&table, &catalog, &[person(1), person(2), person(3)]).await.unwrap();
        conn.commit().await.unwrap();
        assert_eq!(db.largest_commit().await, 9);

        conn.insert(&table, &catalog, &(4..8).map(person).collect::<Vec<_>>())
            .await
            .unwrap();
        assert!(conn.commit().await.is_err());
        assert_eq!(db.row_count(&table).await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_key_fails() {
        let db = MemoryDatabase::new("mem");
        let (table, catalog) = people(&db).await;
        db.insert_rows(&table, vec![person(1)]).await.unwrap();
        let mut conn = db.connect().await.unwrap();
        assert!(conn.insert(&table, &catalog, &[person(1)]).await.is_err());
    }

    #[tokio::test]
    async fn test_keyless_table_accepts_repeated_rows() {
        let db = MemoryDatabase::new("mem");
        let columns = vec![ColumnDef::new("line", "text")];
        let table = db.create_table("app", "log", columns, &[], 0).await;
        let row = vec![SqlValue::Text("same".into())];
        db.insert_rows(&table, vec![row.clone(), row.clone()])
            .await
            .unwrap();
        assert_eq!(db.row_count(&table).await, 2);
    }

    #[tokio::test]
    async fn test_keys_in_range_and_delete() {
        let db = MemoryDatabase::new("mem");
        let (table, catalog) = people(&db).await;
        db.insert_rows(&table, (1..=10).map(person).collect()).await.unwrap();
        let mut conn = db.connect().await.unwrap();

        let keys = conn
            .select_keys_in_range(&table, &catalog, &vec![SqlValue::I64(3)], &vec![SqlValue::I64(8)], 4)
            .await
            .unwrap();
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[0], vec![SqlValue::I64(3)]);

        assert_eq!(conn.delete_keys(&table, &catalog, &keys).await.unwrap(), 4);
        conn.commit().await.unwrap();
        assert_eq!(db.row_count(&table).await, 6);
    }

    #[tokio::test]
    async fn test_composite_key_range_is_lexicographic() {
        let db = MemoryDatabase::new("mem");
        let columns = vec![
            ColumnDef::new("a", "int8").not_null(),
            ColumnDef::new("b", "int8").not_null(),
        ];
        let table = db.create_table("app", "grid", columns.clone(), &["a", "b"], 1).await;
        let catalog = ColumnCatalog::from_columns(
            table.clone(),
            CatalogPurpose::ForSelect,
            &columns,
            vec!["a".into(), "b".into()],
        );
        let mut rows = Vec::new();
        for a in 0..4 {
            for b in 0..10 {
                rows.push(vec![SqlValue::I64(a), SqlValue::I64(b)]);
            }
        }
        db.insert_rows(&table, rows).await.unwrap();
        let mut conn = db.connect().await.unwrap();

        // (1, 7) ..= (3, 2) spans the tail of a=1, all of a=2 and the head of a=3
        let keys = conn
            .select_keys_in_range(
                &table,
                &catalog,
                &vec![SqlValue::I64(1), SqlValue::I64(7)],
                &vec![SqlValue::I64(3), SqlValue::I64(2)],
                100,
            )
            .await
            .unwrap();
        assert_eq!(keys.len(), 3 + 10 + 3);
        assert_eq!(keys[0], vec![SqlValue::I64(1), SqlValue::I64(7)]);
        assert_eq!(keys[15], vec![SqlValue::I64(3), SqlValue::I64(2)]);
    }

    #[tokio::test]
    async fn test_read_only_session_rejects_writes() {
        let db = MemoryDatabase::new("mem");
        let (table, _) = people(&db).await;
        let mut conn = db.connect().await.unwrap();
        conn.set_read_only(true).await.unwrap();
        assert!(conn.delete_all(&table).await.is_err());
    }

    #[tokio::test]
    async fn test_partitioned_scan_streams_every_row() {
        let db = MemoryDatabase::new("mem").with_native_partitions(3);
        let (table, catalog) = people(&db).await;
        db.insert_rows(&table, (1..=10).map(person).collect()).await.unwrap();
        let mut conn = db.connect().await.unwrap();

        let partitions = conn.partitioned_scan(&table, &catalog).await.unwrap().unwrap();
        assert_eq!(partitions.len(), 3);
        let mut total = 0;
        for mut p in partitions {
            while let Some(row) = p.rows.recv().await {
                row.unwrap();
                total += 1;
            }
        }
        assert_eq!(total, 10);
    }
}

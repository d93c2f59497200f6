//! Partition workers: the units a table's work is split into.
//!
//! Every worker opens its own connections inside `run`, moves or deletes its
//! share of rows, and reports a [`ConversionResult`]. Failures never escape
//! `run`; they are wrapped as [`MigrateError::Execution`] and carried in the
//! result alongside the rows that were committed before the failure.

mod bulk_scan;
mod delete;
mod single_delete;
mod upload;

pub use bulk_scan::BulkScanCopyWorker;
pub use delete::DeleteWorker;
pub use single_delete::SingleDeleteWorker;
pub use upload::UploadWorker;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::ColumnCatalog;
use crate::core::{Connection, Row, Table};
use crate::error::{MigrateError, Result};
use crate::estimator::actual_row_size;
use crate::result::ConversionResult;

/// One unit of partitioned work.
pub enum PartitionWorker {
    Upload(UploadWorker),
    BulkScanCopy(BulkScanCopyWorker),
    Delete(DeleteWorker),
    SingleDelete(SingleDeleteWorker),
}

impl PartitionWorker {
    /// Short description for logs.
    pub fn name(&self) -> String {
        match self {
            PartitionWorker::Upload(w) => w.name(),
            PartitionWorker::BulkScanCopy(w) => w.name(),
            PartitionWorker::Delete(w) => w.name(),
            PartitionWorker::SingleDelete(w) => w.name(),
        }
    }

    /// Run to completion or until `stop` fires. A stopped worker still
    /// reports the rows it committed.
    pub async fn run(self, stop: CancellationToken) -> ConversionResult {
        let name = self.name();
        let result = match self {
            PartitionWorker::Upload(w) => w.run(&stop).await,
            PartitionWorker::BulkScanCopy(w) => w.run(&stop).await,
            PartitionWorker::Delete(w) => w.run(&stop).await,
            PartitionWorker::SingleDelete(w) => w.run(&stop).await,
        };
        debug!("{}: finished with {}", name, result);
        result
    }
}

/// Drive `work` until `stop` fires. The interrupted future is dropped, so
/// anything it had not committed is left for the caller to roll back.
async fn until_stopped<F>(stop: &CancellationToken, work: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        output = work => Ok(output),
        _ = stop.cancelled() => Err(MigrateError::Cancelled),
    }
}

/// Wrap a failure with the table and batch size it happened under.
fn execution_error(table: &Table, batch_size: usize, error: MigrateError) -> MigrateError {
    match error {
        e @ (MigrateError::Execution { .. } | MigrateError::Cancelled) => e,
        e => MigrateError::execution(table.full_name(), batch_size, e),
    }
}

/// Buffers rows for one destination connection and tracks what is committed.
///
/// With batching on, rows are sent as one statement batch every
/// `max_statements` rows and whenever the batcher flushes; with batching off,
/// every row is its own statement.
pub(crate) struct InsertBatcher {
    conn: Box<dyn Connection>,
    table: Table,
    catalog: Arc<ColumnCatalog>,
    use_batching: bool,
    max_statements: usize,
    pending: Vec<Row>,
    uncommitted_records: i64,
    uncommitted_bytes: i64,
    committed_records: i64,
    committed_bytes: i64,
}

impl InsertBatcher {
    pub(crate) fn new(
        conn: Box<dyn Connection>,
        table: Table,
        catalog: Arc<ColumnCatalog>,
        use_batching: bool,
        max_statements: usize,
    ) -> Self {
        Self {
            conn,
            table,
            catalog,
            use_batching,
            max_statements: max_statements.max(1),
            pending: Vec::new(),
            uncommitted_records: 0,
            uncommitted_bytes: 0,
            committed_records: 0,
            committed_bytes: 0,
        }
    }

    pub(crate) async fn push(&mut self, row: Row) -> Result<()> {
        self.uncommitted_bytes += actual_row_size(self.catalog.columns(), &row) as i64;
        self.pending.push(row);
        if !self.use_batching || self.pending.len() >= self.max_statements {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let written = if self.use_batching {
            self.conn
                .insert(&self.table, &self.catalog, &self.pending)
                .await?
        } else {
            let mut written = 0;
            for row in &self.pending {
                written += self
                    .conn
                    .insert(&self.table, &self.catalog, std::slice::from_ref(row))
                    .await?;
            }
            written
        };
        self.uncommitted_records += written as i64;
        self.pending.clear();
        Ok(())
    }

    /// Flush and commit everything pushed so far.
    pub(crate) async fn commit(&mut self) -> Result<()> {
        self.flush().await?;
        self.conn.commit().await?;
        self.committed_records += std::mem::take(&mut self.uncommitted_records);
        self.committed_bytes += std::mem::take(&mut self.uncommitted_bytes);
        Ok(())
    }

    /// Whether rows have been pushed since the last commit.
    pub(crate) fn has_uncommitted(&self) -> bool {
        !self.pending.is_empty() || self.uncommitted_records > 0
    }

    /// Discard uncommitted rows. Errors are logged, not returned.
    pub(crate) async fn rollback(&mut self) {
        self.pending.clear();
        self.uncommitted_records = 0;
        self.uncommitted_bytes = 0;
        if let Err(e) = self.conn.rollback().await {
            warn!("{}: rollback failed: {}", self.table, e);
        }
    }

    /// Copy the committed counts into `result`.
    pub(crate) fn record_into(&self, result: &mut ConversionResult) {
        result.record_count += self.committed_records;
        result.byte_count += self.committed_bytes;
    }
}

//! Per-table planning and execution.
//!
//! A [`TableWorker`] is prepared once (catalogs, skip decisions, batch plan,
//! partitioning) and then called once, running its partition workers on a
//! bounded pool.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogPurpose, ColumnCatalog};
use crate::config::{TransferConfig, TransferMode};
use crate::core::{Connection, Database, TablePair};
use crate::error::{MigrateError, Result};
use crate::estimator::{BatchPlan, BatchSizeEstimator};
use crate::partitioner::{plan_offsets, worker_count, KeyRangePartitioner, OffsetShare};
use crate::pool::WorkerPool;
use crate::result::ConversionResult;
use crate::workers::{
    BulkScanCopyWorker, DeleteWorker, PartitionWorker, SingleDeleteWorker, UploadWorker,
};

/// Lifecycle of a [`TableWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Created,
    Preparing,
    Prepared,
    Running,
    Finished,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl WorkerStatus {
    fn can_move_to(self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        matches!(
            (self, next),
            (Created, Preparing)
                | (Preparing, Prepared)
                | (Preparing, Finished)
                | (Prepared, Running)
                | (Running, Finished)
        )
    }
}

/// What a table worker does to its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Copy rows from source to destination.
    Copy,
    /// Remove all destination rows.
    Delete,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Copy => f.write_str("copy"),
            TaskKind::Delete => f.write_str("delete"),
        }
    }
}

/// Why a table is left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    NoPrimaryKey,
    DestinationNotEmpty { rows: i64 },
    NothingToDelete,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoPrimaryKey => f.write_str("no primary key"),
            SkipReason::DestinationNotEmpty { rows } => {
                write!(f, "destination already holds {} rows", rows)
            }
            SkipReason::NothingToDelete => f.write_str("nothing to delete"),
        }
    }
}

/// Result of [`TableWorker::prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    Planned { workers: usize, total_rows: i64 },
    Skipped(SkipReason),
}

/// Final state of one table in a phase.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    Skipped { reason: SkipReason },
    Completed { records: i64, bytes: i64 },
    Failed { records: i64, error: String },
}

/// Rows one partition worker committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    pub worker: String,
    pub records: i64,
    pub bytes: i64,
    pub failed: bool,
}

/// Shared, immutable inputs of every table worker in a run.
#[derive(Clone)]
pub struct WorkerContext {
    pub source: Arc<dyn Database>,
    pub destination: Arc<dyn Database>,
    pub config: Arc<TransferConfig>,
    pub estimator: BatchSizeEstimator,
}

impl WorkerContext {
    /// The estimator takes its ceiling from the destination.
    pub fn new(
        source: Arc<dyn Database>,
        destination: Arc<dyn Database>,
        config: Arc<TransferConfig>,
    ) -> Self {
        let estimator = BatchSizeEstimator::new(
            config.get_batch_byte_budget(),
            destination.mutation_limit(),
            config.get_batch_size(),
        );
        Self {
            source,
            destination,
            config,
            estimator,
        }
    }
}

/// Plans and runs the copy or delete of one table.
pub struct TableWorker {
    pair: TablePair,
    kind: TaskKind,
    ctx: WorkerContext,
    status: WorkerStatus,
    workers: Vec<PartitionWorker>,
    partitions: Vec<PartitionReport>,
    total_rows: i64,
    plan: Option<BatchPlan>,
}

impl TableWorker {
    pub fn new(pair: TablePair, kind: TaskKind, ctx: WorkerContext) -> Self {
        Self {
            pair,
            kind,
            ctx,
            status: WorkerStatus::Created,
            workers: Vec::new(),
            partitions: Vec::new(),
            total_rows: 0,
            plan: None,
        }
    }

    pub fn pair(&self) -> &TablePair {
        &self.pair
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    /// Partition workers planned by `prepare`.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Rows the plan covers: source rows for copies, destination rows for deletes.
    pub fn total_record_count(&self) -> i64 {
        self.total_rows
    }

    pub fn batch_plan(&self) -> Option<BatchPlan> {
        self.plan
    }

    /// Per-partition counts from `call`, in completion order.
    pub fn partitions(&self) -> &[PartitionReport] {
        &self.partitions
    }

    fn transition(&mut self, next: WorkerStatus) -> Result<()> {
        if !self.status.can_move_to(next) {
            return Err(MigrateError::InvalidState {
                table: self.pair.name(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Plan the table's partition workers.
    ///
    /// `source` and `destination` are borrowed for metadata queries only.
    /// On error the worker goes straight to `Finished`.
    pub async fn prepare(
        &mut self,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
    ) -> Result<PrepareOutcome> {
        self.transition(WorkerStatus::Preparing)?;
        let outcome = match self.kind {
            TaskKind::Copy => self.prepare_copy(source, destination).await,
            TaskKind::Delete => self.prepare_delete(destination).await,
        };
        match &outcome {
            Ok(PrepareOutcome::Planned { .. }) => self.transition(WorkerStatus::Prepared)?,
            Ok(PrepareOutcome::Skipped(_)) | Err(_) => {
                self.workers.clear();
                self.transition(WorkerStatus::Finished)?;
            }
        }
        outcome
    }

    async fn prepare_copy(
        &mut self,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
    ) -> Result<PrepareOutcome> {
        let dest_table = self.pair.destination.clone();
        let insert_catalog = Arc::new(
            ColumnCatalog::build_for_table(destination, &dest_table, CatalogPurpose::ForInsert)
                .await?,
        );
        let select_catalog = Arc::new(
            ColumnCatalog::build_for_table(destination, &dest_table, CatalogPurpose::ForSelect)
                .await?,
        );
        if !select_catalog.has_primary_key() {
            warn!("{}: no primary key, skipping", dest_table);
            return Ok(PrepareOutcome::Skipped(SkipReason::NoPrimaryKey));
        }

        let existing = destination.count_rows(&dest_table).await?;
        if existing > 0 {
            match self.ctx.config.mode {
                TransferMode::ThrowExceptionIfExists => {
                    return Err(MigrateError::ModeConflict {
                        table: dest_table.full_name(),
                        rows: existing,
                    });
                }
                TransferMode::DropAndRecreate => {
                    return Err(MigrateError::StaleRows {
                        table: dest_table.full_name(),
                        rows: existing,
                    });
                }
                TransferMode::SkipExisting => {
                    warn!(
                        "{}: destination already holds {} rows, skipping",
                        dest_table, existing
                    );
                    return Ok(PrepareOutcome::Skipped(SkipReason::DestinationNotEmpty {
                        rows: existing,
                    }));
                }
            }
        }

        let index_count = destination.index_count(&dest_table).await?;
        let plan = self.ctx.estimator.plan(select_catalog.columns(), index_count);
        self.plan = Some(plan);

        let total = source.count_rows(&self.pair.source).await?;
        self.total_rows = total;

        if let Some(partitions) = source
            .partitioned_scan(&self.pair.source, &select_catalog)
            .await?
        {
            self.workers = partitions
                .into_iter()
                .map(|partition| {
                    PartitionWorker::BulkScanCopy(BulkScanCopyWorker {
                        destination: Arc::clone(&self.ctx.destination),
                        destination_table: dest_table.clone(),
                        insert_catalog: Arc::clone(&insert_catalog),
                        config: Arc::clone(&self.ctx.config),
                        rows_per_commit: plan.rows_per_commit,
                        partition,
                    })
                })
                .collect();
        } else {
            let total_rows = total.max(0) as u64;
            let shares = if total < self.ctx.config.get_single_worker_threshold() {
                vec![OffsetShare {
                    begin_offset: 0,
                    row_count: total_rows,
                }]
            } else {
                let n = worker_count(
                    total_rows,
                    plan.rows_per_commit,
                    self.ctx.config.get_max_partitions_per_table(),
                );
                plan_offsets(total_rows, n)
            };
            self.workers = shares
                .into_iter()
                .map(|share| {
                    PartitionWorker::Upload(UploadWorker {
                        source: Arc::clone(&self.ctx.source),
                        destination: Arc::clone(&self.ctx.destination),
                        source_table: self.pair.source.clone(),
                        destination_table: dest_table.clone(),
                        select_catalog: Arc::clone(&select_catalog),
                        insert_catalog: Arc::clone(&insert_catalog),
                        config: Arc::clone(&self.ctx.config),
                        rows_per_commit: plan.rows_per_commit,
                        share,
                    })
                })
                .collect();
        }

        info!(
            "{}: {} rows, {} rows per commit, {} workers",
            dest_table,
            total,
            plan.rows_per_commit,
            self.workers.len()
        );
        Ok(PrepareOutcome::Planned {
            workers: self.workers.len(),
            total_rows: total,
        })
    }

    async fn prepare_delete(&mut self, destination: &mut dyn Connection) -> Result<PrepareOutcome> {
        let table = self.pair.destination.clone();
        let catalog = Arc::new(
            ColumnCatalog::build_for_table(destination, &table, CatalogPurpose::ForSelect).await?,
        );
        if !catalog.has_primary_key() {
            warn!("{}: no primary key, skipping", table);
            return Ok(PrepareOutcome::Skipped(SkipReason::NoPrimaryKey));
        }

        let total = destination.count_rows(&table).await?;
        self.total_rows = total;
        if total <= 0 {
            debug!("{}: already empty", table);
            return Ok(PrepareOutcome::Skipped(SkipReason::NothingToDelete));
        }

        if total < self.ctx.config.get_single_worker_threshold() {
            self.workers = vec![PartitionWorker::SingleDelete(SingleDeleteWorker {
                destination: Arc::clone(&self.ctx.destination),
                table: table.clone(),
            })];
        } else {
            let index_count = destination.index_count(&table).await?;
            let plan = self
                .ctx
                .estimator
                .plan_with_width(catalog.columns(), 1, index_count);
            self.plan = Some(plan);

            let wanted = (total as u64).div_ceil(plan.rows_per_commit.max(1) as u64);
            let n = (wanted as usize)
                .min(self.ctx.config.get_max_partitions_per_table())
                .max(1);
            let ranges = KeyRangePartitioner
                .partition(destination, &table, &catalog, total as u64, n)
                .await?;
            self.workers = ranges
                .into_iter()
                .map(|range| {
                    PartitionWorker::Delete(DeleteWorker {
                        destination: Arc::clone(&self.ctx.destination),
                        table: table.clone(),
                        catalog: Arc::clone(&catalog),
                        config: Arc::clone(&self.ctx.config),
                        rows_per_commit: plan.rows_per_commit,
                        range,
                    })
                })
                .collect();
        }

        info!(
            "{}: deleting {} rows with {} workers",
            table,
            total,
            self.workers.len()
        );
        Ok(PrepareOutcome::Planned {
            workers: self.workers.len(),
            total_rows: total,
        })
    }

    /// Run every planned partition worker and merge their results.
    ///
    /// Bounded by the table timeout and by `stop`. Either one stops the
    /// partition workers; rows they committed stay in the merged result.
    pub async fn call(&mut self, stop: &CancellationToken) -> ConversionResult {
        if let Err(e) = self.transition(WorkerStatus::Running) {
            return ConversionResult::failed(e).finish();
        }

        let workers = std::mem::take(&mut self.workers);
        let size = workers
            .len()
            .min(self.ctx.config.get_max_partitions_per_table());
        let mut pool = WorkerPool::new(format!("{} {}", self.kind, self.pair.name()), size);
        let worker_stop = pool.stop_token();
        for worker in workers {
            let stop = worker_stop.clone();
            pool.submit(async move {
                let name = worker.name();
                (name, worker.run(stop).await)
            });
        }

        let joined = pool
            .join(Some(self.ctx.config.get_table_timeout()), Some(stop))
            .await;
        let mut result = ConversionResult::started();
        let interrupted = joined.is_interrupted();
        if let Some(e) = joined.interrupted {
            result.record_error(e);
        }
        for outcome in joined.results {
            match outcome {
                Ok((worker, mut r)) => {
                    if interrupted && matches!(r.error, Some(MigrateError::Cancelled)) {
                        r.error = None;
                    }
                    self.partitions.push(PartitionReport {
                        worker,
                        records: r.record_count,
                        bytes: r.byte_count,
                        failed: r.error.is_some(),
                    });
                    result.merge(r);
                }
                // Never started.
                Err(MigrateError::Cancelled) if interrupted => {}
                Err(e) => result.record_error(e),
            }
        }

        self.status = WorkerStatus::Finished;
        let result = result.finish();
        match &result.error {
            None => info!(
                "{}: {} finished, {} rows in {:.1}s",
                self.pair.destination,
                self.kind,
                result.record_count,
                result.elapsed_seconds()
            ),
            Some(e) => warn!(
                "{}: {} failed after {} rows: {}",
                self.pair.destination, self.kind, result.record_count, e
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDef, SqlValue, Table};
    use crate::drivers::MemoryDatabase;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", "int8").not_null(),
            ColumnDef::new("label", "varchar").with_max_length(16),
        ]
    }

    async fn seeded(db: &MemoryDatabase, rows: i64) -> Table {
        let table = db.create_table("app", "items", columns(), &["id"], 1).await;
        db.insert_rows(
            &table,
            (0..rows)
                .map(|i| vec![SqlValue::I64(i), SqlValue::Text(format!("item {}", i))])
                .collect(),
        )
        .await
        .unwrap();
        table
    }

    fn context(
        source: Arc<MemoryDatabase>,
        destination: Arc<MemoryDatabase>,
        config: TransferConfig,
    ) -> WorkerContext {
        WorkerContext::new(source, destination, Arc::new(config))
    }

    #[test]
    fn test_status_transitions() {
        use WorkerStatus::*;
        assert!(Created.can_move_to(Preparing));
        assert!(Preparing.can_move_to(Finished));
        assert!(!Created.can_move_to(Running));
        assert!(!Finished.can_move_to(Preparing));
        assert!(!Running.can_move_to(Prepared));
    }

    #[tokio::test]
    async fn test_call_before_prepare_is_invalid() {
        let source = Arc::new(MemoryDatabase::new("src"));
        let destination = Arc::new(MemoryDatabase::new("dst"));
        let pair = TablePair::new(Table::new("app", "items"), Table::new("app", "items"));
        let mut worker = TableWorker::new(
            pair,
            TaskKind::Copy,
            context(source, destination, TransferConfig::default()),
        );
        let result = worker.call(&CancellationToken::new()).await;
        assert!(matches!(result.error, Some(MigrateError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_small_table_gets_single_upload_worker() {
        let source = Arc::new(MemoryDatabase::new("src"));
        let destination = Arc::new(MemoryDatabase::new("dst"));
        let table = seeded(&source, 50).await;
        destination.create_table("app", "items", columns(), &["id"], 1).await;

        let pair = TablePair::new(table.clone(), table.clone());
        let ctx = context(source.clone(), destination.clone(), TransferConfig::default());
        let mut worker = TableWorker::new(pair, TaskKind::Copy, ctx);

        let mut src = source.connect().await.unwrap();
        let mut dst = destination.connect().await.unwrap();
        let outcome = worker.prepare(src.as_mut(), dst.as_mut()).await.unwrap();
        assert_eq!(
            outcome,
            PrepareOutcome::Planned {
                workers: 1,
                total_rows: 50
            }
        );
        assert_eq!(worker.status(), WorkerStatus::Prepared);

        let result = worker.call(&CancellationToken::new()).await;
        assert!(result.is_success());
        assert_eq!(result.record_count, 50);
        assert_eq!(worker.status(), WorkerStatus::Finished);
        assert_eq!(destination.row_count(&table).await, 50);
    }

    #[tokio::test]
    async fn test_table_without_primary_key_is_skipped() {
        let source = Arc::new(MemoryDatabase::new("src"));
        let destination = Arc::new(MemoryDatabase::new("dst"));
        let table = source.create_table("app", "log", columns(), &[], 0).await;
        destination.create_table("app", "log", columns(), &[], 0).await;

        let pair = TablePair::new(table.clone(), table);
        let ctx = context(source.clone(), destination.clone(), TransferConfig::default());
        let mut worker = TableWorker::new(pair, TaskKind::Copy, ctx);
        let mut src = source.connect().await.unwrap();
        let mut dst = destination.connect().await.unwrap();

        let outcome = worker.prepare(src.as_mut(), dst.as_mut()).await.unwrap();
        assert_eq!(outcome, PrepareOutcome::Skipped(SkipReason::NoPrimaryKey));
        assert_eq!(worker.status(), WorkerStatus::Finished);
        assert_eq!(worker.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_leftover_rows_under_drop_and_recreate_are_an_error() {
        let source = Arc::new(MemoryDatabase::new("src"));
        let destination = Arc::new(MemoryDatabase::new("dst"));
        let table = seeded(&source, 20).await;
        seeded(&destination, 3).await;

        let pair = TablePair::new(table.clone(), table);
        let config = TransferConfig {
            mode: TransferMode::DropAndRecreate,
            ..Default::default()
        };
        let ctx = context(source.clone(), destination.clone(), config);
        let mut worker = TableWorker::new(pair, TaskKind::Copy, ctx);
        let mut src = source.connect().await.unwrap();
        let mut dst = destination.connect().await.unwrap();

        let outcome = worker.prepare(src.as_mut(), dst.as_mut()).await;
        assert!(matches!(
            outcome,
            Err(MigrateError::StaleRows { rows: 3, .. })
        ));
        assert_eq!(worker.status(), WorkerStatus::Finished);
    }

    #[tokio::test]
    async fn test_prepare_twice_is_invalid() {
        let source = Arc::new(MemoryDatabase::new("src"));
        let destination = Arc::new(MemoryDatabase::new("dst"));
        let table = seeded(&source, 5).await;
        destination.create_table("app", "items", columns(), &["id"], 1).await;

        let pair = TablePair::new(table.clone(), table);
        let ctx = context(source.clone(), destination.clone(), TransferConfig::default());
        let mut worker = TableWorker::new(pair, TaskKind::Copy, ctx);
        let mut src = source.connect().await.unwrap();
        let mut dst = destination.connect().await.unwrap();

        worker.prepare(src.as_mut(), dst.as_mut()).await.unwrap();
        let again = worker.prepare(src.as_mut(), dst.as_mut()).await;
        assert!(matches!(again, Err(MigrateError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_small_delete_uses_single_delete() {
        let source = Arc::new(MemoryDatabase::new("src"));
        let destination = Arc::new(MemoryDatabase::new("dst"));
        let table = seeded(&destination, 30).await;

        let pair = TablePair::new(table.clone(), table.clone());
        let ctx = context(source.clone(), destination.clone(), TransferConfig::default());
        let mut worker = TableWorker::new(pair, TaskKind::Delete, ctx);
        let mut src = source.connect().await.unwrap();
        let mut dst = destination.connect().await.unwrap();

        let outcome = worker.prepare(src.as_mut(), dst.as_mut()).await.unwrap();
        assert_eq!(
            outcome,
            PrepareOutcome::Planned {
                workers: 1,
                total_rows: 30
            }
        );
        let result = worker.call(&CancellationToken::new()).await;
        assert_eq!(result.record_count, 30);
        assert_eq!(destination.row_count(&table).await, 0);
    }
}

//! Run orchestration: table discovery, then a delete phase and a copy phase,
//! each a prepare pass and a run pass over a bounded table pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogPurpose, ColumnCatalog};
use crate::config::{Config, DatabaseConfig, TransferConfig, TransferMode};
use crate::core::{Database, Table, TablePair};
use crate::drivers;
use crate::error::{MigrateError, Result};
use crate::partitioner::worker_count;
use crate::pool::WorkerPool;
use crate::result::ConversionResult;
use crate::table_worker::{PrepareOutcome, TableOutcome, TableWorker, TaskKind, WorkerContext};

/// One table's line in a phase report.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    pub outcome: TableOutcome,
}

/// Outcome of one phase.
///
/// `prepare` holds planning failures and `run` holds row movement failures.
#[derive(Debug, Serialize)]
pub struct PhaseReport {
    pub kind: TaskKind,
    pub prepare: ConversionResult,
    pub run: ConversionResult,
    pub tables: Vec<TableReport>,
}

impl PhaseReport {
    fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            prepare: ConversionResult::started(),
            run: ConversionResult::started(),
            tables: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.prepare.is_success() && self.run.is_success()
    }

    /// Take the first captured error, planning errors first.
    pub fn take_error(&mut self) -> Option<MigrateError> {
        self.prepare.take_error().or_else(|| self.run.take_error())
    }

    fn count(&self, matches: impl Fn(&TableOutcome) -> bool) -> usize {
        self.tables.iter().filter(|t| matches(&t.outcome)).count()
    }
}

/// Summary of a whole run.
#[derive(Debug, Serialize)]
pub struct MigrationReport {
    pub run_id: String,
    pub mode: TransferMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub tables_total: usize,
    pub tables_completed: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,
    pub rows_deleted: i64,
    pub rows_copied: i64,
    pub bytes_copied: i64,
    pub phases: Vec<PhaseReport>,
}

impl MigrationReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The report of one phase, if it ran.
    pub fn phase(&self, kind: TaskKind) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.kind == kind)
    }
}

/// Dry-run view of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TablePlan {
    pub table: String,
    pub has_primary_key: bool,
    pub source_rows: i64,
    pub destination_rows: i64,
    pub rows_per_commit: usize,
    pub workers: usize,
}

/// Copies every shared table from a source database to a destination.
pub struct DataCopier {
    source: Arc<dyn Database>,
    destination: Arc<dyn Database>,
    config: Arc<TransferConfig>,
    source_schema: Option<String>,
    destination_schema: Option<String>,
}

impl DataCopier {
    /// Copier over every non-system schema of both databases.
    pub fn new(
        source: Arc<dyn Database>,
        destination: Arc<dyn Database>,
        config: Arc<TransferConfig>,
    ) -> Self {
        Self {
            source,
            destination,
            config,
            source_schema: None,
            destination_schema: None,
        }
    }

    /// Copier restricted to the schemas named in `config`.
    pub fn from_config(
        source: Arc<dyn Database>,
        destination: Arc<dyn Database>,
        config: &Config,
    ) -> Self {
        Self::new(source, destination, Arc::new(config.transfer.clone())).with_schemas(
            Some(config.source.get_schema()),
            Some(config.destination.get_schema()),
        )
    }

    pub fn with_schemas(
        mut self,
        source_schema: Option<String>,
        destination_schema: Option<String>,
    ) -> Self {
        self.source_schema = source_schema;
        self.destination_schema = destination_schema;
        self
    }

    fn context(&self) -> WorkerContext {
        WorkerContext::new(
            Arc::clone(&self.source),
            Arc::clone(&self.destination),
            Arc::clone(&self.config),
        )
    }

    /// Destination tables that pass the filters and also exist in the source.
    pub async fn discover_tables(&self) -> Result<Vec<TablePair>> {
        let mut dst = self.destination.connect().await?;
        let destination_tables = dst.list_tables(self.destination_schema.as_deref()).await?;
        drop(dst);

        let mut src = self.source.connect().await?;
        let source_tables: Vec<Table> = src
            .list_tables(self.source_schema.as_deref())
            .await?
            .into_iter()
            .filter(|t| !self.source.is_system_schema(&t.schema))
            .collect();
        drop(src);

        let mut pairs = Vec::new();
        for table in destination_tables {
            if self.destination.is_system_schema(&table.schema) {
                continue;
            }
            if !self.config.accepts_table(&table.name) {
                debug!("{}: excluded by filters", table);
                continue;
            }
            match source_tables
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(&table.name))
            {
                Some(source) => pairs.push(TablePair::new(source.clone(), table)),
                None => debug!("{}: not present in source, ignoring", table),
            }
        }
        Ok(pairs)
    }

    /// Discover, delete (for `DropAndRecreate`) and copy.
    ///
    /// Stops after the first phase that captured an error and returns that
    /// error; partial totals are logged first.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Starting run {}: {} -> {} (mode: {:?})",
            run_id,
            self.source.name(),
            self.destination.name(),
            self.config.mode
        );

        info!("Phase 1: Discovering tables");
        let tables = self.discover_tables().await?;
        info!("Found {} tables to copy", tables.len());

        let mut kinds = Vec::new();
        if self.config.mode == TransferMode::DropAndRecreate {
            kinds.push(TaskKind::Delete);
        }
        kinds.push(TaskKind::Copy);

        let mut phases = Vec::new();
        for (i, kind) in kinds.into_iter().enumerate() {
            info!("Phase {}: {} {} tables", i + 2, kind, tables.len());
            let mut phase = self.run_phase(kind, &tables, &cancel).await;
            let failure = phase.take_error();
            phases.push(phase);
            if let Some(e) = failure {
                error!("{} phase failed: {}", kind, e);
                log_totals(&phases);
                return Err(e);
            }
        }

        let completed_at = Utc::now();
        let sum = |kind: TaskKind, f: fn(&ConversionResult) -> i64| {
            phases
                .iter()
                .filter(|p| p.kind == kind)
                .map(|p| f(&p.run))
                .sum::<i64>()
        };
        let copy_phase = phases.iter().find(|p| p.kind == TaskKind::Copy);
        let count = |f: fn(&TableOutcome) -> bool| copy_phase.map_or(0, |p| p.count(f));

        let report = MigrationReport {
            run_id,
            mode: self.config.mode,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            tables_total: tables.len(),
            tables_completed: count(|o| matches!(o, TableOutcome::Completed { .. })),
            tables_skipped: count(|o| matches!(o, TableOutcome::Skipped { .. })),
            tables_failed: count(|o| matches!(o, TableOutcome::Failed { .. })),
            rows_deleted: sum(TaskKind::Delete, |r| r.record_count),
            rows_copied: sum(TaskKind::Copy, |r| r.record_count),
            bytes_copied: sum(TaskKind::Copy, |r| r.byte_count),
            phases,
        };
        log_totals(&report.phases);
        info!(
            "Run {} completed in {:.1}s",
            report.run_id, report.duration_seconds
        );
        Ok(report)
    }

    /// Prepare then run one phase over `tables`.
    ///
    /// Both passes share the phase timeout. When it elapses or `cancel` fires,
    /// running tables are stopped and what they committed is still counted.
    /// Errors are captured in the report, never returned.
    pub async fn run_phase(
        &self,
        kind: TaskKind,
        tables: &[TablePair],
        cancel: &CancellationToken,
    ) -> PhaseReport {
        let mut report = PhaseReport::new(kind);
        let budget = self.config.get_phase_timeout();
        let deadline = Instant::now() + budget;
        let table_slots = self.config.get_max_concurrent_tables();
        let ctx = self.context();

        // Prepare pass
        let mut pool = WorkerPool::new(format!("{} prepare", kind), table_slots);
        let stop = pool.stop_token();
        for pair in tables.iter().cloned() {
            let ctx = ctx.clone();
            let stop = stop.clone();
            pool.submit(async move {
                let mut worker = TableWorker::new(pair, kind, ctx.clone());
                let outcome = tokio::select! {
                    outcome = prepare_table(&mut worker, &ctx) => outcome,
                    _ = stop.cancelled() => Err(MigrateError::Cancelled),
                };
                (worker, outcome)
            });
        }

        let joined = pool.join(Some(budget), Some(cancel)).await;
        let interrupted = joined.is_interrupted();
        if let Some(e) = joined.interrupted {
            report.prepare.record_error(phase_error(e, kind, budget));
        }
        let mut planned = Vec::new();
        for entry in joined.results {
            match entry {
                Ok((worker, Ok(PrepareOutcome::Planned { .. }))) => planned.push(worker),
                Ok((worker, Ok(PrepareOutcome::Skipped(reason)))) => {
                    report.tables.push(TableReport {
                        table: worker.pair().name(),
                        outcome: TableOutcome::Skipped { reason },
                    });
                }
                Ok((_, Err(MigrateError::Cancelled))) | Err(MigrateError::Cancelled)
                    if interrupted => {}
                Ok((worker, Err(e))) => {
                    error!("{}: {} prepare failed: {}", worker.pair().name(), kind, e);
                    report.tables.push(TableReport {
                        table: worker.pair().name(),
                        outcome: TableOutcome::Failed {
                            records: 0,
                            error: e.to_string(),
                        },
                    });
                    report.prepare.record_error(e);
                }
                Err(e) => report.prepare.record_error(e),
            }
        }
        report.prepare = std::mem::take(&mut report.prepare).finish();
        if interrupted {
            report.tables.sort_by(|a, b| a.table.cmp(&b.table));
            return report;
        }

        // Run pass
        report.run = ConversionResult::started();
        let mut pool = WorkerPool::new(format!("{} run", kind), table_slots);
        let stop = pool.stop_token();
        for mut worker in planned {
            let stop = stop.clone();
            pool.submit(async move {
                let result = worker.call(&stop).await;
                (worker.pair().name(), result)
            });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let joined = pool.join(Some(remaining), Some(cancel)).await;
        let interrupted = joined.is_interrupted();
        // The phase-level reason goes first so it is the error the run reports.
        if let Some(e) = joined.interrupted {
            report.run.record_error(phase_error(e, kind, budget));
        }
        for entry in joined.results {
            match entry {
                Ok((table, result)) => {
                    let outcome = match &result.error {
                        None => TableOutcome::Completed {
                            records: result.record_count,
                            bytes: result.byte_count,
                        },
                        Some(e) => TableOutcome::Failed {
                            records: result.record_count,
                            error: e.to_string(),
                        },
                    };
                    report.tables.push(TableReport { table, outcome });
                    report.run.merge(result);
                }
                // Queued behind the table slots when the phase stopped.
                Err(MigrateError::Cancelled) if interrupted => {}
                Err(e) => report.run.record_error(e),
            }
        }
        report.run = std::mem::take(&mut report.run).finish();
        report.tables.sort_by(|a, b| a.table.cmp(&b.table));

        info!(
            "{} phase: {} rows across {} tables in {:.1}s",
            kind,
            report.run.record_count,
            report.tables.len(),
            report.run.elapsed_seconds()
        );
        report
    }

    /// What a copy would do, without moving any rows.
    pub async fn plan(&self) -> Result<Vec<TablePlan>> {
        let ctx = self.context();
        let mut plans = Vec::new();
        for pair in self.discover_tables().await? {
            let mut src = self.source.connect().await?;
            let mut dst = self.destination.connect().await?;
            let catalog =
                ColumnCatalog::build_for_table(dst.as_mut(), &pair.destination, CatalogPurpose::ForSelect)
                    .await?;
            let index_count = dst.index_count(&pair.destination).await?;
            let batch = ctx.estimator.plan(catalog.columns(), index_count);
            let source_rows = src.count_rows(&pair.source).await?;
            let destination_rows = dst.count_rows(&pair.destination).await?;

            let workers = if !catalog.has_primary_key() {
                0
            } else if source_rows < self.config.get_single_worker_threshold() {
                1
            } else {
                worker_count(
                    source_rows.max(0) as u64,
                    batch.rows_per_commit,
                    self.config.get_max_partitions_per_table(),
                )
            };
            plans.push(TablePlan {
                table: pair.name(),
                has_primary_key: catalog.has_primary_key(),
                source_rows,
                destination_rows,
                rows_per_commit: batch.rows_per_commit,
                workers,
            });
        }
        Ok(plans)
    }
}

/// Connectivity of both sides of a configuration.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_tables: usize,
    pub source_error: Option<String>,
    pub destination_connected: bool,
    pub destination_latency_ms: u64,
    pub destination_tables: usize,
    pub destination_error: Option<String>,
    pub healthy: bool,
}

/// Open both databases and list their tables.
pub async fn health_check(config: &Config) -> HealthCheckResult {
    let (source_latency_ms, source) = probe(&config.source).await;
    let (destination_latency_ms, destination) = probe(&config.destination).await;
    let healthy = source.is_ok() && destination.is_ok();
    HealthCheckResult {
        source_connected: source.is_ok(),
        source_latency_ms,
        source_tables: *source.as_ref().unwrap_or(&0),
        source_error: source.err().map(|e| e.to_string()),
        destination_connected: destination.is_ok(),
        destination_latency_ms,
        destination_tables: *destination.as_ref().unwrap_or(&0),
        destination_error: destination.err().map(|e| e.to_string()),
        healthy,
    }
}

async fn probe(config: &DatabaseConfig) -> (u64, Result<usize>) {
    let started = std::time::Instant::now();
    let outcome = async {
        let db = drivers::open(config).await?;
        let tables = count_user_tables(db.as_ref(), Some(&config.get_schema())).await;
        db.close().await;
        tables
    }
    .await;
    (started.elapsed().as_millis() as u64, outcome)
}

/// Number of tables outside system schemas, read on a fresh session.
pub async fn count_user_tables(db: &dyn Database, schema: Option<&str>) -> Result<usize> {
    let mut conn = db.connect().await?;
    let tables = conn.list_tables(schema).await?;
    Ok(tables
        .iter()
        .filter(|t| !db.is_system_schema(&t.schema))
        .count())
}

/// Acquire metadata sessions on both sides and prepare one table.
async fn prepare_table(worker: &mut TableWorker, ctx: &WorkerContext) -> Result<PrepareOutcome> {
    let mut source = ctx.source.connect().await?;
    let mut destination = ctx.destination.connect().await?;
    worker.prepare(source.as_mut(), destination.as_mut()).await
}

/// Name the phase in pool-level timeouts.
fn phase_error(error: MigrateError, kind: TaskKind, budget: Duration) -> MigrateError {
    match error {
        MigrateError::Timeout { .. } => {
            warn!("{} phase exceeded its {:?} budget", kind, budget);
            MigrateError::timeout(format!("{} phase", kind), budget)
        }
        other => other,
    }
}

fn log_totals(phases: &[PhaseReport]) {
    for phase in phases {
        info!(
            "{} totals: {} rows, {} bytes, {} completed, {} skipped, {} failed",
            phase.kind,
            phase.run.record_count,
            phase.run.byte_count,
            phase.count(|o| matches!(o, TableOutcome::Completed { .. })),
            phase.count(|o| matches!(o, TableOutcome::Skipped { .. })),
            phase.count(|o| matches!(o, TableOutcome::Failed { .. })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDef, SqlValue};
    use crate::drivers::MemoryDatabase;

    async fn items(db: &MemoryDatabase, rows: i64) -> Table {
        let table = db
            .create_table(
                "app",
                "items",
                vec![ColumnDef::new("id", "int8").not_null()],
                &["id"],
                1,
            )
            .await;
        db.insert_rows(&table, (0..rows).map(|i| vec![SqlValue::I64(i)]).collect())
            .await
            .unwrap();
        table
    }

    #[tokio::test]
    async fn test_schema_restriction() {
        let source = Arc::new(MemoryDatabase::new("src"));
        let destination = Arc::new(MemoryDatabase::new("dst"));
        items(&source, 0).await;
        items(&destination, 0).await;
        destination
            .create_table("staging", "items", vec![ColumnDef::new("id", "int8")], &["id"], 1)
            .await;

        let copier = DataCopier::new(source, destination, Arc::new(TransferConfig::default()))
            .with_schemas(None, Some("staging".into()));
        let pairs = copier.discover_tables().await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].source.schema, "app");
        assert_eq!(pairs[0].destination.schema, "staging");
    }

    #[tokio::test]
    async fn test_phase_report_counts_outcomes() {
        let source = Arc::new(MemoryDatabase::new("src"));
        let destination = Arc::new(MemoryDatabase::new("dst"));
        let table = items(&source, 40).await;
        items(&destination, 0).await;
        let log = source.create_table("app", "log", vec![ColumnDef::new("line", "text")], &[], 0).await;
        destination.create_table("app", "log", vec![ColumnDef::new("line", "text")], &[], 0).await;

        let copier = DataCopier::new(
            source.clone(),
            destination.clone(),
            Arc::new(TransferConfig::default()),
        );
        let pairs = copier.discover_tables().await.unwrap();
        let report = copier
            .run_phase(TaskKind::Copy, &pairs, &CancellationToken::new())
            .await;

        assert!(report.is_success());
        assert_eq!(report.run.record_count, 40);
        assert_eq!(report.count(|o| matches!(o, TableOutcome::Completed { .. })), 1);
        assert_eq!(report.count(|o| matches!(o, TableOutcome::Skipped { .. })), 1);
        assert_eq!(report.tables[0].table, table.full_name());
        assert_eq!(report.tables[1].table, log.full_name());
    }

    #[tokio::test]
    async fn test_count_user_tables_ignores_system_schemas() {
        let db = MemoryDatabase::new("mem");
        items(&db, 0).await;
        db.create_table("information_schema", "columns", vec![ColumnDef::new("id", "int8")], &[], 0)
            .await;
        assert_eq!(count_user_tables(&db, None).await.unwrap(), 1);
        assert_eq!(count_user_tables(&db, Some("information_schema")).await.unwrap(), 0);
    }
}

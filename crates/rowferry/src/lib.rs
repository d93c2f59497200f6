//! # rowferry
//!
//! Concurrent, partitioned table copy between SQL databases.
//!
//! For every table present on both sides, rowferry:
//!
//! - **Plans** rows per commit from column sizes and the destination's
//!   mutation ceiling
//! - **Partitions** the table into offset shares (copy) or primary key
//!   ranges (delete)
//! - **Runs** one worker per partition on a bounded pool, committing batch
//!   by batch
//!
//! Tables themselves run concurrently on a second pool. A run optionally
//! empties the destination first (`drop_and_recreate`).
//!
//! ## Example
//!
//! ```rust,no_run
//! use rowferry::{drivers, Config, DataCopier};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> rowferry::Result<()> {
//! let config = Config::load("config.yaml")?.with_auto_tuning();
//! let source = drivers::open(&config.source).await?;
//! let destination = drivers::open(&config.destination).await?;
//!
//! let copier = DataCopier::from_config(source, destination, &config);
//! let report = copier.run(CancellationToken::new()).await?;
//! println!("Copied {} rows", report.rows_copied);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod copier;
pub mod core;
pub mod drivers;
pub mod error;
pub mod estimator;
pub mod partitioner;
pub mod pool;
pub mod result;
pub mod table_worker;
pub mod workers;

// Re-exports for convenient access
pub use catalog::{CatalogPurpose, ColumnCatalog};
pub use config::{Config, DatabaseConfig, DatabaseKind, TransferConfig, TransferMode};
pub use copier::{
    health_check, DataCopier, HealthCheckResult, MigrationReport, PhaseReport, TablePlan,
    TableReport,
};
pub use crate::core::{Connection, Database, Table, TablePair};
pub use error::{MigrateError, Result};
pub use estimator::{BatchPlan, BatchSizeEstimator};
pub use result::ConversionResult;
pub use table_worker::{TableOutcome, TableWorker, TaskKind, WorkerContext};

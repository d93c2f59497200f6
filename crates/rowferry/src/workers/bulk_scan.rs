use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::ColumnCatalog;
use crate::config::TransferConfig;
use crate::core::{Database, ScanPartition, Table};
use crate::error::Result;
use crate::result::ConversionResult;

use super::{execution_error, until_stopped, InsertBatcher};

/// Drains one natively partitioned scan into the destination.
pub struct BulkScanCopyWorker {
    pub destination: Arc<dyn Database>,
    pub destination_table: Table,
    pub insert_catalog: Arc<ColumnCatalog>,
    pub config: Arc<TransferConfig>,
    pub rows_per_commit: usize,
    pub partition: ScanPartition,
}

impl BulkScanCopyWorker {
    pub fn name(&self) -> String {
        format!(
            "bulk scan {} partition {}",
            self.destination_table, self.partition.index
        )
    }

    pub async fn run(mut self, stop: &CancellationToken) -> ConversionResult {
        let mut result = ConversionResult::started();
        if let Err(e) = self.copy(&mut result, stop).await {
            result.record_error(execution_error(
                &self.destination_table,
                self.rows_per_commit,
                e,
            ));
        }
        result.finish()
    }

    async fn copy(
        &mut self,
        result: &mut ConversionResult,
        stop: &CancellationToken,
    ) -> Result<()> {
        let destination = self.destination.connect().await?;
        let mut batcher = InsertBatcher::new(
            destination,
            self.destination_table.clone(),
            Arc::clone(&self.insert_catalog),
            self.config.get_use_batching(),
            self.config.get_max_statements_per_batch(),
        );

        let outcome = until_stopped(stop, self.drain(&mut batcher))
            .await
            .and_then(|r| r);
        if outcome.is_err() && batcher.has_uncommitted() {
            batcher.rollback().await;
        }
        batcher.record_into(result);
        outcome
    }

    async fn drain(&mut self, batcher: &mut InsertBatcher) -> Result<()> {
        let rows_per_commit = self.rows_per_commit.max(1);
        let mut since_commit = 0;

        while let Some(row) = self.partition.rows.recv().await {
            batcher.push(row?).await?;
            since_commit += 1;
            if since_commit >= rows_per_commit {
                batcher.commit().await?;
                debug!(
                    "{}: partition {} committed {} rows",
                    self.destination_table, self.partition.index, since_commit
                );
                since_commit = 0;
            }
        }
        batcher.commit().await
    }
}

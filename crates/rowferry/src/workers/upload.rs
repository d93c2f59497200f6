use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::ColumnCatalog;
use crate::config::TransferConfig;
use crate::core::{Connection, Database, Table};
use crate::error::Result;
use crate::partitioner::OffsetShare;
use crate::result::ConversionResult;

use super::{execution_error, until_stopped, InsertBatcher};

/// Copies one offset share of a table, page by page in key order.
pub struct UploadWorker {
    pub source: Arc<dyn Database>,
    pub destination: Arc<dyn Database>,
    pub source_table: Table,
    pub destination_table: Table,
    pub select_catalog: Arc<ColumnCatalog>,
    pub insert_catalog: Arc<ColumnCatalog>,
    pub config: Arc<TransferConfig>,
    pub rows_per_commit: usize,
    pub share: OffsetShare,
}

impl UploadWorker {
    pub fn name(&self) -> String {
        format!(
            "upload {} [{}+{}]",
            self.destination_table, self.share.begin_offset, self.share.row_count
        )
    }

    pub async fn run(self, stop: &CancellationToken) -> ConversionResult {
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

    async fn copy(&self, result: &mut ConversionResult, stop: &CancellationToken) -> Result<()> {
        let mut source = self.source.connect().await?;
        let destination = self.destination.connect().await?;
        let mut batcher = InsertBatcher::new(
            destination,
            self.destination_table.clone(),
            Arc::clone(&self.insert_catalog),
            self.config.get_use_batching(),
            self.config.get_max_statements_per_batch(),
        );

        let outcome = until_stopped(stop, self.copy_pages(source.as_mut(), &mut batcher))
            .await
            .and_then(|r| r);
        if outcome.is_err() && batcher.has_uncommitted() {
            batcher.rollback().await;
        }
        batcher.record_into(result);
        outcome
    }

    async fn copy_pages(
        &self,
        source: &mut dyn Connection,
        batcher: &mut InsertBatcher,
    ) -> Result<()> {
        let end = self.share.begin_offset + self.share.row_count;
        let mut offset = self.share.begin_offset;

        while offset < end {
            let limit = (self.rows_per_commit as u64).min(end - offset);
            let page = source
                .select_page(&self.source_table, &self.select_catalog, limit, offset)
                .await?;
            if page.is_empty() {
                debug!("{}: no more rows at offset {}", self.destination_table, offset);
                break;
            }

            let fetched = page.len() as u64;
            for row in page {
                batcher.push(row).await?;
            }
            batcher.commit().await?;
            debug!(
                "{}: committed {} rows at offset {}",
                self.destination_table, fetched, offset
            );
            offset += fetched;
        }
        Ok(())
    }
}

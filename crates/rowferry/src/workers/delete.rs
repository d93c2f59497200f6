use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::ColumnCatalog;
use crate::config::TransferConfig;
use crate::core::{Connection, Database, KeyTuple, Table};
use crate::error::Result;
use crate::partitioner::KeyRange;
use crate::result::ConversionResult;

use super::{execution_error, until_stopped};

/// Deletes up to `range.approximate_row_count` rows whose keys fall in a
/// closed key range.
///
/// Keys are read on a read-only session and deleted on a second one, one
/// committed page at a time.
pub struct DeleteWorker {
    pub destination: Arc<dyn Database>,
    pub table: Table,
    pub catalog: Arc<ColumnCatalog>,
    pub config: Arc<TransferConfig>,
    pub rows_per_commit: usize,
    pub range: KeyRange,
}

impl DeleteWorker {
    pub fn name(&self) -> String {
        format!(
            "delete {} [{}..={}]",
            self.table, self.range.begin_offset, self.range.end_offset
        )
    }

    pub async fn run(self, stop: &CancellationToken) -> ConversionResult {
        let mut result = ConversionResult::started();
        let (Some(begin), Some(end)) = (&self.range.begin_key, &self.range.end_key) else {
            debug!("{}: empty range, nothing to delete", self.name());
            return result.finish();
        };
        if let Err(e) = self.delete(begin, end, &mut result, stop).await {
            result.record_error(execution_error(&self.table, self.rows_per_commit, e));
        }
        result.finish()
    }

    async fn delete(
        &self,
        begin: &KeyTuple,
        end: &KeyTuple,
        result: &mut ConversionResult,
        stop: &CancellationToken,
    ) -> Result<()> {
        let mut reader = self.destination.connect().await?;
        reader.set_read_only(true).await?;
        let mut writer = self.destination.connect().await?;

        let pages = self.delete_pages(reader.as_mut(), writer.as_mut(), begin, end, result);
        let outcome = until_stopped(stop, pages).await.and_then(|r| r);
        if outcome.is_err() {
            if let Err(e) = writer.rollback().await {
                warn!("{}: rollback failed: {}", self.table, e);
            }
        }
        outcome
    }

    async fn delete_pages(
        &self,
        reader: &mut dyn Connection,
        writer: &mut dyn Connection,
        begin: &KeyTuple,
        end: &KeyTuple,
        result: &mut ConversionResult,
    ) -> Result<()> {
        let target = self.range.approximate_row_count;
        let mut deleted = 0u64;

        while deleted < target {
            let limit = (self.rows_per_commit as u64).min(target - deleted);
            let keys = reader
                .select_keys_in_range(&self.table, &self.catalog, begin, end, limit)
                .await?;
            if keys.is_empty() {
                break;
            }

            let removed = self.delete_keys(writer, &keys).await?;
            writer.commit().await?;
            if removed == 0 {
                warn!(
                    "{}: page of {} keys deleted no rows, stopping",
                    self.table,
                    keys.len()
                );
                break;
            }
            deleted += removed;
            result.record_count += removed as i64;
            debug!("{}: deleted {} of {} rows", self.name(), deleted, target);
        }
        Ok(())
    }

    async fn delete_keys(&self, writer: &mut dyn Connection, keys: &[KeyTuple]) -> Result<u64> {
        let chunk = if self.config.get_use_batching() {
            self.config.get_max_statements_per_batch()
        } else {
            1
        };
        let mut removed = 0;
        for batch in keys.chunks(chunk.max(1)) {
            removed += writer.delete_keys(&self.table, &self.catalog, batch).await?;
        }
        Ok(removed)
    }
}

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::{Database, Table};
use crate::error::{MigrateError, Result};
use crate::result::ConversionResult;

use super::{execution_error, until_stopped};

/// Empties a small table with one unconditional DELETE.
pub struct SingleDeleteWorker {
    pub destination: Arc<dyn Database>,
    pub table: Table,
}

impl SingleDeleteWorker {
    pub fn name(&self) -> String {
        format!("delete all {}", self.table)
    }

    pub async fn run(self, stop: &CancellationToken) -> ConversionResult {
        let mut result = ConversionResult::started();
        match self.delete(stop).await {
            Ok(removed) => result.record_count = removed as i64,
            Err(e) => result.record_error(execution_error(&self.table, 0, e)),
        }
        result.finish()
    }

    async fn delete(&self, stop: &CancellationToken) -> Result<u64> {
        let mut conn = self.destination.connect().await?;
        let statement = async {
            let removed = conn.delete_all(&self.table).await?;
            conn.commit().await?;
            Ok::<_, MigrateError>(removed)
        };
        let outcome = until_stopped(stop, statement).await.and_then(|r| r);
        if outcome.is_err() {
            if let Err(e) = conn.rollback().await {
                warn!("{}: rollback failed: {}", self.table, e);
            }
        }
        outcome
    }
}

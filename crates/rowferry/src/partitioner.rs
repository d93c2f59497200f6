//! Splitting a table's rows into contiguous ranges, one per worker.
//!
//! Ranges are found by probing the row at a given offset in primary-key
//! order, so keys of any type (and composite keys) work. The probes assume the
//! table does not change between planning and the scan: concurrent writes can
//! shift offsets and leave gaps or overlaps between neighbouring ranges.

use tracing::debug;

use crate::catalog::ColumnCatalog;
use crate::core::{Connection, KeyTuple, Table};
use crate::error::Result;

/// One worker's share of a table, by offset in key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetShare {
    /// First row, inclusive.
    pub begin_offset: u64,
    /// Number of rows in the share.
    pub row_count: u64,
}

impl OffsetShare {
    /// Last row, inclusive. `None` for an empty share.
    pub fn end_offset(&self) -> Option<u64> {
        (self.row_count > 0).then(|| self.begin_offset + self.row_count - 1)
    }
}

/// A closed key range `[begin_key, end_key]`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub begin_offset: u64,
    pub end_offset: u64,
    /// `None` when the begin probe found no row.
    pub begin_key: Option<KeyTuple>,
    /// `None` when the end probe found no row.
    pub end_key: Option<KeyTuple>,
    pub approximate_row_count: u64,
}

impl KeyRange {
    /// True when either bound is missing; a worker given this range does nothing.
    pub fn is_empty(&self) -> bool {
        self.begin_key.is_none() || self.end_key.is_none()
    }
}

/// Divide `total` rows into `workers` shares of `ceil(total / workers)`; the
/// last share takes whatever remains, which may be less or nothing.
pub fn plan_offsets(total: u64, workers: usize) -> Vec<OffsetShare> {
    let workers = workers.max(1) as u64;
    let share = total.div_ceil(workers);
    (0..workers)
        .map(|i| {
            let begin = (i * share).min(total);
            let row_count = if i == workers - 1 {
                total - begin
            } else {
                share.min(total - begin)
            };
            OffsetShare {
                begin_offset: begin,
                row_count,
            }
        })
        .collect()
}

/// Number of workers for a table of `total` rows.
///
/// `clamp(ceil(total / batch), 1, max_workers)`.
pub fn worker_count(total: u64, rows_per_commit: usize, max_workers: usize) -> usize {
    let batch = rows_per_commit.max(1) as u64;
    let wanted = total.div_ceil(batch);
    (wanted.min(max_workers.max(1) as u64) as usize).max(1)
}

/// Probes row offsets to turn offset shares into key ranges.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyRangePartitioner;

impl KeyRangePartitioner {
    /// Split `total` rows of `table` into `workers` closed key ranges.
    ///
    /// Each share's begin and end rows are probed on `conn`; the final share
    /// always ends at row `total - 1`.
    pub async fn partition(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        catalog: &ColumnCatalog,
        total: u64,
        workers: usize,
    ) -> Result<Vec<KeyRange>> {
        let shares = plan_offsets(total, workers);
        let last = shares.len().saturating_sub(1);
        let mut ranges = Vec::with_capacity(shares.len());

        for (i, share) in shares.iter().enumerate() {
            let Some(mut end_offset) = share.end_offset() else {
                ranges.push(KeyRange {
                    begin_offset: share.begin_offset,
                    end_offset: share.begin_offset,
                    begin_key: None,
                    end_key: None,
                    approximate_row_count: 0,
                });
                continue;
            };
            if i == last {
                end_offset = total - 1;
            }

            let begin_key = conn.probe_key(table, catalog, share.begin_offset).await?;
            let end_key = conn.probe_key(table, catalog, end_offset).await?;
            debug!(
                "{}: range {} covers offsets {}..={}",
                table, i, share.begin_offset, end_offset
            );

            let approximate_row_count = if begin_key.is_some() && end_key.is_some() {
                share.row_count
            } else {
                0
            };
            ranges.push(KeyRange {
                begin_offset: share.begin_offset,
                end_offset,
                begin_key,
                end_key,
                approximate_row_count,
            });
        }

        Ok(ranges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(shares: &[OffsetShare]) -> Vec<(u64, u64)> {
        shares
            .iter()
            .map(|s| (s.begin_offset, s.begin_offset + s.row_count))
            .collect()
    }

    #[test]
    fn test_even_split() {
        let shares = plan_offsets(10_000, 4);
        assert_eq!(
            bounds(&shares),
            vec![(0, 2500), (2500, 5000), (5000, 7500), (7500, 10_000)]
        );
    }

    #[test]
    fn test_last_share_absorbs_remainder() {
        let shares = plan_offsets(10, 3);
        assert_eq!(bounds(&shares), vec![(0, 4), (4, 8), (8, 10)]);
    }

    #[test]
    fn test_more_workers_than_rows() {
        let shares = plan_offsets(2, 4);
        assert_eq!(bounds(&shares), vec![(0, 1), (1, 2), (2, 2), (2, 2)]);
        assert_eq!(shares[3].end_offset(), None);
    }

    #[test]
    fn test_shares_cover_every_offset_once() {
        for total in [0u64, 1, 7, 99, 100, 101, 12_345] {
            for workers in 1..=9 {
                let shares = plan_offsets(total, workers);
                assert_eq!(shares.len(), workers);
                let mut next = 0;
                for share in &shares {
                    assert_eq!(share.begin_offset, next);
                    next += share.row_count;
                }
                assert_eq!(next, total);
            }
        }
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(10_000, 1_000, 4), 4);
        assert_eq!(worker_count(2_500, 1_000, 8), 3);
        assert_eq!(worker_count(0, 1_000, 8), 1);
        assert_eq!(worker_count(20_000, 4_000, 5), 5);
    }

    #[tokio::test]
    async fn test_partition_probes_key_bounds() {
        use crate::catalog::CatalogPurpose;
        use crate::core::{ColumnDef, Database, SqlValue};
        use crate::drivers::MemoryDatabase;

        let db = MemoryDatabase::new("dst");
        let table = db
            .create_table(
                "app",
                "events",
                vec![ColumnDef::new("id", "int8").not_null()],
                &["id"],
                1,
            )
            .await;
        db.insert_rows(&table, (0..10).map(|i| vec![SqlValue::I64(i * 10)]).collect())
            .await
            .unwrap();

        let mut conn = db.connect().await.unwrap();
        let catalog =
            ColumnCatalog::build_for_table(conn.as_mut(), &table, CatalogPurpose::ForSelect)
                .await
                .unwrap();
        let ranges = KeyRangePartitioner
            .partition(conn.as_mut(), &table, &catalog, 10, 3)
            .await
            .unwrap();

        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].begin_key, Some(vec![SqlValue::I64(0)]));
        assert_eq!(ranges[0].end_key, Some(vec![SqlValue::I64(30)]));
        assert_eq!(ranges[1].begin_key, Some(vec![SqlValue::I64(40)]));
        assert_eq!(ranges[2].end_key, Some(vec![SqlValue::I64(90)]));
        assert_eq!(ranges[2].end_offset, 9);
        assert_eq!(
            ranges.iter().map(|r| r.approximate_row_count).sum::<u64>(),
            10
        );
    }

    #[tokio::test]
    async fn test_partition_past_the_end_is_empty() {
        use crate::catalog::CatalogPurpose;
        use crate::core::{ColumnDef, Database, SqlValue};
        use crate::drivers::MemoryDatabase;

        let db = MemoryDatabase::new("dst");
        let table = db
            .create_table(
                "app",
                "events",
                vec![ColumnDef::new("id", "int8").not_null()],
                &["id"],
                1,
            )
            .await;
        db.insert_rows(&table, vec![vec![SqlValue::I64(1)]])
            .await
            .unwrap();

        let mut conn = db.connect().await.unwrap();
        let catalog =
            ColumnCatalog::build_for_table(conn.as_mut(), &table, CatalogPurpose::ForSelect)
                .await
                .unwrap();
        // Planned for more rows than the table now holds.
        let ranges = KeyRangePartitioner
            .partition(conn.as_mut(), &table, &catalog, 2, 2)
            .await
            .unwrap();
        assert!(!ranges[0].is_empty());
        assert!(ranges[1].is_empty());
        assert_eq!(ranges[1].approximate_row_count, 0);
    }
}

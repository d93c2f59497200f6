//! Rows-per-commit planning.
//!
//! Destinations with a mutation ceiling reject commits that touch more than
//! `ceiling` column-writes, where every row costs one write per column plus
//! one per index. The estimate is made once per table from declared column
//! sizes and reused for every batch of that table.

use crate::catalog::CatalogColumn;
use crate::core::{SqlValue, TypeCategory};

/// Mutation ceiling used for capped destinations that do not state their own.
pub const DEFAULT_MUTATION_CEILING: usize = 20_000;

/// Smallest batch ever planned.
pub const MIN_BATCH_ROWS: usize = 100;

/// Per-column storage overhead added to every row estimate.
pub const COLUMN_OVERHEAD_BYTES: u64 = 8;

/// Rows per commit for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub rows_per_commit: usize,
    pub row_size_bytes: u64,
}

/// Batch size planner. Stateless apart from its inputs.
#[derive(Debug, Clone, Copy)]
pub struct BatchSizeEstimator {
    byte_budget: u64,
    mutation_ceiling: Option<usize>,
    configured_rows: usize,
}

impl BatchSizeEstimator {
    pub fn new(byte_budget: u64, mutation_ceiling: Option<usize>, configured_rows: usize) -> Self {
        Self {
            byte_budget,
            mutation_ceiling,
            configured_rows: configured_rows.max(1),
        }
    }

    pub fn mutation_ceiling(&self) -> Option<usize> {
        self.mutation_ceiling
    }

    /// Plan for a table whose mutations write `columns` per row.
    pub fn plan(&self, columns: &[CatalogColumn], index_count: usize) -> BatchPlan {
        self.plan_with_width(columns, columns.len(), index_count)
    }

    /// Plan with an explicit per-row write width. Keyed deletes write one
    /// column per row regardless of the table's width.
    pub fn plan_with_width(
        &self,
        columns: &[CatalogColumn],
        write_width: usize,
        index_count: usize,
    ) -> BatchPlan {
        let row_size_bytes = estimate_row_size(columns);
        let rows_per_commit = estimate_batch_size(
            self.byte_budget,
            row_size_bytes,
            write_width,
            index_count,
            self.mutation_ceiling,
            self.configured_rows,
        );
        BatchPlan {
            rows_per_commit,
            row_size_bytes,
        }
    }
}

/// Declared size of one row in bytes.
pub fn estimate_row_size(columns: &[CatalogColumn]) -> u64 {
    columns
        .iter()
        .map(|c| declared_size(c.category, c.max_length) + COLUMN_OVERHEAD_BYTES)
        .sum()
}

fn declared_size(category: TypeCategory, max_length: i64) -> u64 {
    let len = max_length.max(0) as u64;
    match category {
        TypeCategory::Boolean => 1,
        TypeCategory::Date => 4,
        TypeCategory::Numeric => 8,
        TypeCategory::Timestamp => 12,
        TypeCategory::Text => 2 * len,
        TypeCategory::Binary => len,
        TypeCategory::Array | TypeCategory::Other => 0,
    }
}

/// Rows per commit.
///
/// With a ceiling: `max(min(budget / row_size, ceiling / (columns + indexes)), 100)`.
/// The floor wins on very wide tables. Without a ceiling the configured row
/// batch size is used unchanged.
pub fn estimate_batch_size(
    byte_budget: u64,
    row_size_bytes: u64,
    column_count: usize,
    index_count: usize,
    mutation_ceiling: Option<usize>,
    configured_rows: usize,
) -> usize {
    let Some(ceiling) = mutation_ceiling else {
        return configured_rows;
    };

    let by_bytes = if row_size_bytes == 0 {
        usize::MAX
    } else {
        usize::try_from(byte_budget / row_size_bytes).unwrap_or(usize::MAX)
    };
    let writes_per_row = (column_count + index_count).max(1);
    let by_mutations = ceiling / writes_per_row;

    by_bytes.min(by_mutations).max(MIN_BATCH_ROWS)
}

/// Size of a retrieved value, used for byte accounting while copying.
///
/// Same cost table as the estimate, but variable-length values count their
/// real length.
pub fn actual_value_size(category: TypeCategory, value: &SqlValue) -> u64 {
    match category {
        TypeCategory::Boolean => 1,
        TypeCategory::Date => 4,
        TypeCategory::Numeric => 8,
        TypeCategory::Timestamp => 12,
        TypeCategory::Text | TypeCategory::Binary => match value {
            SqlValue::Text(s) => s.len() as u64,
            SqlValue::Bytes(b) => b.len() as u64,
            _ => 0,
        },
        TypeCategory::Array | TypeCategory::Other => 0,
    }
}

/// Byte size of a whole row against its catalog columns.
pub fn actual_row_size(columns: &[CatalogColumn], row: &[SqlValue]) -> u64 {
    columns
        .iter()
        .zip(row.iter())
        .map(|(c, v)| actual_value_size(c.category, v))
        .sum()
}

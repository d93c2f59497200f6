//! Column catalogs: the copyable columns of one table and the SQL fragments
//! built from them.

use tracing::debug;

use crate::core::{ColumnDef, Connection, Dialect, Table, TypeCategory};
use crate::error::{MigrateError, Result};

/// Which statement family a catalog is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogPurpose {
    /// SELECT statements. Columns named after their table get qualified.
    ForSelect,
    /// INSERT statements. Column references stay bare.
    ForInsert,
}

/// One column as referenced in generated SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    /// Table name prefix, set for select catalogs when the column shares
    /// its table's name.
    pub qualifier: Option<String>,
    pub data_type: String,
    pub category: TypeCategory,
    pub max_length: i64,
}

impl CatalogColumn {
    fn render(&self, dialect: &dyn Dialect) -> String {
        match &self.qualifier {
            Some(q) => format!("{}.{}", dialect.quote_ident(q), dialect.quote_ident(&self.name)),
            None => dialect.quote_ident(&self.name),
        }
    }
}

/// Ordered columns of a table plus its primary key.
#[derive(Debug, Clone)]
pub struct ColumnCatalog {
    table: Table,
    purpose: CatalogPurpose,
    columns: Vec<CatalogColumn>,
    primary_key: Vec<String>,
}

impl ColumnCatalog {
    /// Read column and key metadata for `table` through `conn`.
    pub async fn build_for_table(
        conn: &mut dyn Connection,
        table: &Table,
        purpose: CatalogPurpose,
    ) -> Result<Self> {
        let columns = conn
            .describe_columns(table)
            .await
            .map_err(|e| MigrateError::schema_lookup(table.full_name(), e))?;
        if columns.is_empty() {
            return Err(MigrateError::schema_lookup(
                table.full_name(),
                "no columns found",
            ));
        }
        let primary_key = conn
            .primary_key(table)
            .await
            .map_err(|e| MigrateError::schema_lookup(table.full_name(), e))?;

        debug!(
            "Catalog for {} ({:?}): {} columns, key {:?}",
            table,
            purpose,
            columns.len(),
            primary_key
        );
        Ok(Self::from_columns(table.clone(), purpose, &columns, primary_key))
    }

    /// Build a catalog from already-known metadata.
    pub fn from_columns(
        table: Table,
        purpose: CatalogPurpose,
        columns: &[ColumnDef],
        primary_key: Vec<String>,
    ) -> Self {
        let columns = columns
            .iter()
            .map(|c| {
                let qualifier = (purpose == CatalogPurpose::ForSelect
                    && c.name.eq_ignore_ascii_case(&table.name))
                .then(|| table.name.clone());
                CatalogColumn {
                    name: c.name.clone(),
                    qualifier,
                    data_type: c.data_type.clone(),
                    category: c.category(),
                    max_length: c.max_length,
                }
            })
            .collect();

        Self {
            table,
            purpose,
            columns,
            primary_key,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn purpose(&self) -> CatalogPurpose {
        self.purpose
    }

    pub fn columns(&self) -> &[CatalogColumn] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Position of each key column within the column list.
    pub fn primary_key_positions(&self) -> Vec<Option<usize>> {
        self.primary_key
            .iter()
            .map(|k| self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(k)))
            .collect()
    }

    /// `a, b, t.c`
    pub fn column_list(&self, dialect: &dyn Dialect) -> String {
        self.columns
            .iter()
            .map(|c| c.render(dialect))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// One placeholder per column, numbered from `first`.
    pub fn parameter_list(&self, dialect: &dyn Dialect, first: usize) -> String {
        (0..self.columns.len())
            .map(|i| dialect.param_placeholder(first + i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Key columns, comma separated.
    pub fn primary_key_list(&self, dialect: &dyn Dialect) -> String {
        self.primary_key
            .iter()
            .map(|k| dialect.quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Key columns, each prefixed with `prefix.`.
    pub fn primary_key_list_with_prefix(&self, dialect: &dyn Dialect, prefix: &str) -> String {
        let prefix = dialect.quote_ident(prefix);
        self.primary_key
            .iter()
            .map(|k| format!("{}.{}", prefix, dialect.quote_ident(k)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `(k1, k2) >= (?1, ?2) AND (k1, k2) <= (?3, ?4)`
    ///
    /// Row-value comparison, so composite keys are ordered lexicographically
    /// the same way `ORDER BY k1, k2` walks them. Callers bind the begin tuple
    /// and then the end tuple. A single key column is compared bare.
    pub fn key_range_clause(
        &self,
        dialect: &dyn Dialect,
        prefix: Option<&str>,
        first: usize,
    ) -> String {
        let n = self.primary_key.len();
        let keys = match prefix {
            Some(p) => self.primary_key_list_with_prefix(dialect, p),
            None => self.primary_key_list(dialect),
        };
        let params = |from: usize| {
            (from..from + n)
                .map(|i| dialect.param_placeholder(i))
                .collect::<Vec<_>>()
                .join(", ")
        };
        if n == 1 {
            format!(
                "{} >= {} AND {} <= {}",
                keys,
                params(first),
                keys,
                params(first + 1)
            )
        } else {
            format!(
                "({}) >= ({}) AND ({}) <= ({})",
                keys,
                params(first),
                keys,
                params(first + n)
            )
        }
    }

    /// `k1 = ?1 AND k2 = ?2`
    pub fn key_equality_clause(&self, dialect: &dyn Dialect, first: usize) -> String {
        self.primary_key
            .iter()
            .enumerate()
            .map(|(i, k)| format!("{} = {}", dialect.quote_ident(k), dialect.param_placeholder(first + i)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mysql::MysqlDialect;
    use crate::drivers::postgres::PostgresDialect;

    fn orders_catalog(purpose: CatalogPurpose) -> ColumnCatalog {
        ColumnCatalog::from_columns(
            Table::new("shop", "order"),
            purpose,
            &[
                ColumnDef::new("id", "int8").not_null(),
                ColumnDef::new("line", "int4").not_null(),
                ColumnDef::new("Order", "varchar").with_max_length(40),
            ],
            vec!["id".into(), "line".into()],
        )
    }

    #[test]
    fn test_select_catalog_qualifies_column_named_like_table() {
        let catalog = orders_catalog(CatalogPurpose::ForSelect);
        assert_eq!(
            catalog.column_list(&PostgresDialect),
            r#""id", "line", "order"."Order""#
        );
    }

    #[test]
    fn test_insert_catalog_keeps_bare_names() {
        let catalog = orders_catalog(CatalogPurpose::ForInsert);
        assert_eq!(catalog.column_list(&MysqlDialect), "`id`, `line`, `Order`");
        assert_eq!(catalog.parameter_list(&MysqlDialect, 1), "?, ?, ?");
        assert_eq!(catalog.parameter_list(&PostgresDialect, 1), "$1, $2, $3");
    }

    #[test]
    fn test_key_lists() {
        let catalog = orders_catalog(CatalogPurpose::ForSelect);
        assert_eq!(catalog.primary_key_list(&PostgresDialect), r#""id", "line""#);
        assert_eq!(
            catalog.primary_key_list_with_prefix(&PostgresDialect, "t"),
            r#""t"."id", "t"."line""#
        );
        assert_eq!(catalog.primary_key_positions(), vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_composite_key_range_compares_row_values() {
        let catalog = orders_catalog(CatalogPurpose::ForSelect);
        assert_eq!(
            catalog.key_range_clause(&PostgresDialect, None, 1),
            r#"("id", "line") >= ($1, $2) AND ("id", "line") <= ($3, $4)"#
        );
        assert_eq!(
            catalog.key_range_clause(&MysqlDialect, Some("order"), 1),
            "(`order`.`id`, `order`.`line`) >= (?, ?) AND (`order`.`id`, `order`.`line`) <= (?, ?)"
        );
    }

    #[test]
    fn test_key_equality_clause() {
        let catalog = orders_catalog(CatalogPurpose::ForInsert);
        assert_eq!(
            catalog.key_equality_clause(&PostgresDialect, 1),
            r#""id" = $1 AND "line" = $2"#
        );
    }

    #[test]
    fn test_no_primary_key() {
        let catalog = ColumnCatalog::from_columns(
            Table::new("public", "events"),
            CatalogPurpose::ForInsert,
            &[ColumnDef::new("payload", "text")],
            vec![],
        );
        assert!(!catalog.has_primary_key());
        assert_eq!(catalog.key_equality_clause(&PostgresDialect, 1), "");
    }
}

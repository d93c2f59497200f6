//! Shared SQL implementation of [`Connection`] for server databases.
//!
//! Drivers only provide a [`SqlClient`] (run a statement with positional
//! parameters) and a [`Dialect`]; statement text is rendered here from the
//! column catalog.

use async_trait::async_trait;
use tracing::debug;

use crate::catalog::ColumnCatalog;
use crate::core::{ColumnDef, Connection, Dialect, KeyTuple, Row, SqlValue, Table};
use crate::error::{MigrateError, Result};

/// Minimal statement execution interface a driver session provides.
#[async_trait]
pub trait SqlClient: Send {
    fn dialect(&self) -> &dyn Dialect;

    /// Run a query and return all rows.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a statement once per parameter set, as one batch. Returns affected rows.
    async fn execute_batch(&mut self, sql: &str, params: &[Vec<SqlValue>]) -> Result<u64>;

    /// Run a parameterless statement (transaction control, session settings).
    async fn simple(&mut self, sql: &str) -> Result<()>;
}

/// SELECT of one page in key order.
pub fn select_page_sql(
    dialect: &dyn Dialect,
    table: &Table,
    catalog: &ColumnCatalog,
    limit: u64,
    offset: u64,
) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY {} LIMIT {} OFFSET {}",
        catalog.column_list(dialect),
        dialect.qualified_table(table),
        catalog.primary_key_list(dialect),
        limit,
        offset
    )
}

/// SELECT of the key at one offset.
pub fn probe_key_sql(
    dialect: &dyn Dialect,
    table: &Table,
    catalog: &ColumnCatalog,
    offset: u64,
) -> String {
    let keys = catalog.primary_key_list(dialect);
    format!(
        "SELECT {} FROM {} ORDER BY {} LIMIT 1 OFFSET {}",
        keys,
        dialect.qualified_table(table),
        keys,
        offset
    )
}

/// SELECT of keys within a closed range. Begin values bind first, then end values.
pub fn keys_in_range_sql(
    dialect: &dyn Dialect,
    table: &Table,
    catalog: &ColumnCatalog,
    limit: u64,
) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT {}",
        catalog.primary_key_list_with_prefix(dialect, &table.name),
        dialect.qualified_table(table),
        catalog.key_range_clause(dialect, Some(&table.name), 1),
        catalog.primary_key_list_with_prefix(dialect, &table.name),
        limit
    )
}

pub fn insert_sql(dialect: &dyn Dialect, table: &Table, catalog: &ColumnCatalog) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.qualified_table(table),
        catalog.column_list(dialect),
        catalog.parameter_list(dialect, 1)
    )
}

pub fn delete_by_key_sql(dialect: &dyn Dialect, table: &Table, catalog: &ColumnCatalog) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        dialect.qualified_table(table),
        catalog.key_equality_clause(dialect, 1)
    )
}

/// A [`Connection`] over any [`SqlClient`].
pub struct SqlConnection<C> {
    client: C,
    in_transaction: bool,
}

impl<C: SqlClient> SqlConnection<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            in_transaction: false,
        }
    }

    async fn ensure_transaction(&mut self) -> Result<()> {
        if !self.in_transaction {
            let begin = self.client.dialect().begin_statement();
            self.client.simple(begin).await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn scalar_i64(&mut self, sql: &str, params: &[SqlValue], what: &str) -> Result<i64> {
        let rows = self.client.query(sql, params).await?;
        rows.first()
            .and_then(|r| r.first())
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| MigrateError::driver(self.client.dialect().name(), format!("{} returned no value", what)))
    }
}

fn text_at(row: &Row, idx: usize) -> String {
    row.get(idx)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl<C: SqlClient> Connection for SqlConnection<C> {
    async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<Table>> {
        let sql = self.client.dialect().tables_query(schema.is_some());
        let params: Vec<SqlValue> = schema.map(SqlValue::from).into_iter().collect();
        let rows = self.client.query(&sql, &params).await?;
        Ok(rows
            .iter()
            .map(|r| Table::new(text_at(r, 0), text_at(r, 1)))
            .collect())
    }

    async fn describe_columns(&mut self, table: &Table) -> Result<Vec<ColumnDef>> {
        let sql = self.client.dialect().columns_query();
        let params = [
            SqlValue::from(table.schema.as_str()),
            SqlValue::from(table.name.as_str()),
        ];
        let rows = self.client.query(sql, &params).await?;
        Ok(rows
            .iter()
            .map(|r| ColumnDef {
                name: text_at(r, 0),
                data_type: text_at(r, 1),
                max_length: r.get(2).and_then(SqlValue::as_i64).unwrap_or(0),
                is_nullable: text_at(r, 3).eq_ignore_ascii_case("yes"),
            })
            .collect())
    }

    async fn primary_key(&mut self, table: &Table) -> Result<Vec<String>> {
        let sql = self.client.dialect().primary_key_query();
        let params = [
            SqlValue::from(table.schema.as_str()),
            SqlValue::from(table.name.as_str()),
        ];
        let rows = self.client.query(sql, &params).await?;
        Ok(rows.iter().map(|r| text_at(r, 0)).collect())
    }

    async fn index_count(&mut self, table: &Table) -> Result<usize> {
        let sql = self.client.dialect().index_count_query();
        let params = [
            SqlValue::from(table.schema.as_str()),
            SqlValue::from(table.name.as_str()),
        ];
        let count = self.scalar_i64(sql, &params, "index count").await?;
        Ok(count.max(0) as usize)
    }

    async fn count_rows(&mut self, table: &Table) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            self.client.dialect().qualified_table(table)
        );
        self.scalar_i64(&sql, &[], "row count").await
    }

    async fn select_page(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Row>> {
        let sql = select_page_sql(self.client.dialect(), table, catalog, limit, offset);
        debug!("{}", sql);
        self.client.query(&sql, &[]).await
    }

    async fn probe_key(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        offset: u64,
    ) -> Result<Option<KeyTuple>> {
        let sql = probe_key_sql(self.client.dialect(), table, catalog, offset);
        let rows = self.client.query(&sql, &[]).await?;
        Ok(rows.into_iter().next())
    }

    async fn select_keys_in_range(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        begin: &KeyTuple,
        end: &KeyTuple,
        limit: u64,
    ) -> Result<Vec<KeyTuple>> {
        let sql = keys_in_range_sql(self.client.dialect(), table, catalog, limit);
        let params: Vec<SqlValue> = begin.iter().chain(end.iter()).cloned().collect();
        self.client.query(&sql, &params).await
    }

    async fn insert(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.ensure_transaction().await?;
        let sql = insert_sql(self.client.dialect(), table, catalog);
        self.client.execute_batch(&sql, rows).await
    }

    async fn delete_keys(
        &mut self,
        table: &Table,
        catalog: &ColumnCatalog,
        keys: &[KeyTuple],
    ) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.ensure_transaction().await?;
        let sql = delete_by_key_sql(self.client.dialect(), table, catalog);
        self.client.execute_batch(&sql, keys).await
    }

    async fn delete_all(&mut self, table: &Table) -> Result<u64> {
        self.ensure_transaction().await?;
        let sql = format!("DELETE FROM {}", self.client.dialect().qualified_table(table));
        self.client.execute_batch(&sql, &[Vec::new()]).await
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.client.simple("COMMIT").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.client.simple("ROLLBACK").await?;
        }
        Ok(())
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        let sql = self.client.dialect().read_only_statement(read_only);
        self.client.simple(sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogPurpose;
    use crate::drivers::mysql::MysqlDialect;
    use crate::drivers::postgres::PostgresDialect;

    fn catalog() -> (Table, ColumnCatalog) {
        let table = Table::new("public", "orders");
        let catalog = ColumnCatalog::from_columns(
            table.clone(),
            CatalogPurpose::ForSelect,
            &[ColumnDef::new("id", "int8"), ColumnDef::new("total", "numeric")],
            vec!["id".into()],
        );
        (table, catalog)
    }

    #[test]
    fn test_select_page_sql() {
        let (table, catalog) = catalog();
        assert_eq!(
            select_page_sql(&PostgresDialect, &table, &catalog, 1000, 2500),
            r#"SELECT "id", "total" FROM "public"."orders" ORDER BY "id" LIMIT 1000 OFFSET 2500"#
        );
    }

    #[test]
    fn test_probe_key_sql() {
        let (table, catalog) = catalog();
        assert_eq!(
            probe_key_sql(&MysqlDialect, &table, &catalog, 7499),
            "SELECT `id` FROM `public`.`orders` ORDER BY `id` LIMIT 1 OFFSET 7499"
        );
    }

    #[test]
    fn test_keys_in_range_sql() {
        let (table, catalog) = catalog();
        assert_eq!(
            keys_in_range_sql(&PostgresDialect, &table, &catalog, 500),
            r#"SELECT "orders"."id" FROM "public"."orders" WHERE "orders"."id" >= $1 AND "orders"."id" <= $2 ORDER BY "orders"."id" LIMIT 500"#
        );
    }

    #[test]
    fn test_write_statements() {
        let (table, catalog) = catalog();
        assert_eq!(
            insert_sql(&PostgresDialect, &table, &catalog),
            r#"INSERT INTO "public"."orders" ("id", "total") VALUES ($1, $2)"#
        );
        assert_eq!(
            delete_by_key_sql(&MysqlDialect, &table, &catalog),
            "DELETE FROM `public`.`orders` WHERE `id` = ?"
        );
    }
}

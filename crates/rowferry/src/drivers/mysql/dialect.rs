//! MySQL/MariaDB SQL dialect.

use crate::core::traits::Dialect;

/// MySQL/MariaDB dialect implementation.
///
/// Compatible with MySQL 5.7+, 8.0+, and MariaDB 10.2+.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn read_only_statement(&self, read_only: bool) -> &'static str {
        if read_only {
            "SET SESSION TRANSACTION READ ONLY"
        } else {
            "SET SESSION TRANSACTION READ WRITE"
        }
    }

    fn begin_statement(&self) -> &'static str {
        "START TRANSACTION"
    }

    fn tables_query(&self, with_schema: bool) -> String {
        let mut sql = String::from(
            "SELECT CAST(table_schema AS CHAR), CAST(table_name AS CHAR) \
             FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE'",
        );
        if with_schema {
            sql.push_str(" AND table_schema = ?");
        }
        sql.push_str(" ORDER BY table_schema, table_name");
        sql
    }

    fn columns_query(&self) -> &'static str {
        r#"
            SELECT
                CAST(column_name AS CHAR),
                CAST(data_type AS CHAR),
                CAST(COALESCE(character_maximum_length, 0) AS SIGNED),
                CAST(is_nullable AS CHAR)
            FROM information_schema.columns
            WHERE table_schema = ? AND table_name = ?
            ORDER BY ordinal_position
        "#
    }

    fn primary_key_query(&self) -> &'static str {
        r#"
            SELECT CAST(k.column_name AS CHAR)
            FROM information_schema.table_constraints t
            JOIN information_schema.key_column_usage k
              ON k.constraint_name = t.constraint_name
             AND k.table_schema = t.table_schema
             AND k.table_name = t.table_name
            WHERE t.constraint_type = 'PRIMARY KEY'
              AND t.table_schema = ?
              AND t.table_name = ?
            ORDER BY k.ordinal_position
        "#
    }

    fn index_count_query(&self) -> &'static str {
        "SELECT COUNT(DISTINCT index_name) FROM information_schema.statistics WHERE table_schema = ? AND table_name = ?"
    }
}

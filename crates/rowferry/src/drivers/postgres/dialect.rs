//! PostgreSQL SQL dialect.

use crate::core::traits::Dialect;

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn read_only_statement(&self, read_only: bool) -> &'static str {
        if read_only {
            "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY"
        } else {
            "SET SESSION CHARACTERISTICS AS TRANSACTION READ WRITE"
        }
    }

    fn tables_query(&self, with_schema: bool) -> String {
        let mut sql = String::from(
            "SELECT table_schema::text, table_name::text \
             FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE'",
        );
        if with_schema {
            sql.push_str(" AND table_schema = $1");
        }
        sql.push_str(" ORDER BY table_schema, table_name");
        sql
    }

    fn columns_query(&self) -> &'static str {
        r#"
            SELECT
                column_name::text,
                udt_name::text,
                COALESCE(character_maximum_length, 0)::int8,
                is_nullable::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#
    }

    fn primary_key_query(&self) -> &'static str {
        r#"
            SELECT a.attname::text
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
            WHERE n.nspname = $1
              AND t.relname = $2
              AND c.contype = 'p'
              AND a.attnum = ANY(c.conkey)
            ORDER BY array_position(c.conkey, a.attnum)
        "#
    }

    fn index_count_query(&self) -> &'static str {
        "SELECT COUNT(*)::int8 FROM pg_catalog.pg_indexes WHERE schemaname = $1 AND tablename = $2"
    }
}

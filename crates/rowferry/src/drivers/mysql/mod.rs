//! MySQL/MariaDB driver.
//!
//! - [`MysqlDialect`]: SQL syntax strategy
//! - [`MysqlDatabase`]: pooled endpoint handing out [`SqlConnection`]s
//!
//! Statements always use the binary protocol, so integers and temporal
//! values arrive typed. Compatible with MySQL 5.7+, 8.0+ and MariaDB 10.2+.

mod dialect;
mod value;

pub use dialect::MysqlDialect;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, SslOpts};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::core::{Connection, Database, Dialect, Row, SqlValue};
use crate::drivers::sql::{SqlClient, SqlConnection};
use crate::error::{MigrateError, Result};

/// A MySQL endpoint backed by a `mysql_async` pool.
pub struct MysqlDatabase {
    pool: Pool,
    mutation_limit: Option<usize>,
}

impl MysqlDatabase {
    /// Build the pool and verify one connection.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let ssl_opts = match config.ssl_mode.to_lowercase().as_str() {
            "disable" => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            "require" => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
            "verify-ca" => Some(SslOpts::default().with_danger_skip_domain_validation(true)),
            "verify-full" => Some(SslOpts::default()),
            other => {
                return Err(MigrateError::Config(format!(
                    "Invalid ssl_mode '{}' for MySQL",
                    other
                )))
            }
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.get_port())
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let constraints = PoolConstraints::new(1, config.get_max_connections().max(1))
            .ok_or_else(|| MigrateError::Config("invalid MySQL pool size".into()))?;
        // Connections are reset when returned, dropping session settings
        // and any open transaction.
        let pool_opts = PoolOpts::new()
            .with_constraints(constraints)
            .with_reset_connection(true);

        let opts: Opts = builder.pool_opts(pool_opts).into();
        let pool = Pool::new(opts);

        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "creating MySQL pool"))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL connection"))?;
        drop(conn);

        info!("Connected to MySQL: {}", config.endpoint());

        Ok(Self {
            pool,
            mutation_limit: config.get_mutation_limit(),
        })
    }
}

#[async_trait]
impl Database for MysqlDatabase {
    fn name(&self) -> &str {
        "mysql"
    }

    fn is_system_schema(&self, schema: &str) -> bool {
        matches!(
            schema.to_lowercase().as_str(),
            "mysql" | "information_schema" | "performance_schema" | "sys"
        )
    }

    fn mutation_limit(&self) -> Option<usize> {
        self.mutation_limit
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "acquiring MySQL connection"))?;
        Ok(Box::new(SqlConnection::new(MysqlClient { conn })))
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            warn!("Error closing MySQL pool: {}", e);
        }
    }
}

fn params_of(values: &[SqlValue]) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(value::to_mysql).collect())
    }
}

/// One pooled MySQL session.
pub struct MysqlClient {
    conn: Conn,
}

#[async_trait]
impl SqlClient for MysqlClient {
    fn dialect(&self) -> &dyn Dialect {
        &MysqlDialect
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let rows: Vec<mysql_async::Row> = self.conn.exec(sql, params_of(params)).await?;
        Ok(rows
            .iter()
            .map(|row| {
                row.columns_ref()
                    .iter()
                    .enumerate()
                    .map(|(i, col)| {
                        let raw = row.as_ref(i).cloned().unwrap_or(mysql_async::Value::NULL);
                        value::from_mysql(col, raw)
                    })
                    .collect()
            })
            .collect())
    }

    async fn execute_batch(&mut self, sql: &str, params: &[Vec<SqlValue>]) -> Result<u64> {
        let stmt = self.conn.prep(sql).await?;
        let mut affected = 0;
        for p in params {
            self.conn.exec_drop(&stmt, params_of(p)).await?;
            affected += self.conn.affected_rows();
        }
        Ok(affected)
    }

    async fn simple(&mut self, sql: &str) -> Result<()> {
        self.conn.query_drop(sql).await?;
        Ok(())
    }
}

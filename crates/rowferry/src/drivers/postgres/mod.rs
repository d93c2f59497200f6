//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PgDatabase`]: pooled endpoint handing out [`SqlConnection`]s

mod dialect;
mod tls;
mod value;

pub use dialect::PostgresDialect;
pub use tls::SslMode;

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::core::{Connection, Database, Dialect, Row, SqlValue};
use crate::drivers::sql::{SqlClient, SqlConnection};
use crate::error::{MigrateError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A PostgreSQL endpoint backed by a deadpool connection pool.
pub struct PgDatabase {
    pool: Pool,
    mutation_limit: Option<usize>,
}

impl PgDatabase {
    /// Build the pool and verify one connection.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.get_port());
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(CONNECT_TIMEOUT);

        // Clean discards session state (read-only mode, open transactions)
        // when a connection returns to the pool.
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Clean,
        };

        let mgr = match SslMode::parse(&config.ssl_mode)?.connector()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(config.get_max_connections())
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))?;

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL connection"))?;
        client.simple_query("SELECT 1").await?;

        info!("Connected to PostgreSQL: {}", config.endpoint());

        Ok(Self {
            pool,
            mutation_limit: config.get_mutation_limit(),
        })
    }
}

#[async_trait]
impl Database for PgDatabase {
    fn name(&self) -> &str {
        "postgres"
    }

    fn is_system_schema(&self, schema: &str) -> bool {
        schema == "pg_catalog"
            || schema == "information_schema"
            || schema.starts_with("pg_toast")
            || schema.starts_with("pg_temp")
    }

    fn mutation_limit(&self) -> Option<usize> {
        self.mutation_limit
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "acquiring PostgreSQL connection"))?;
        Ok(Box::new(SqlConnection::new(PgClient { client })))
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// One pooled PostgreSQL session.
pub struct PgClient {
    client: Object,
}

#[async_trait]
impl SqlClient for PgClient {
    fn dialect(&self) -> &dyn Dialect {
        &PostgresDialect
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self.client.query(sql, &refs).await?;
        rows.iter().map(value::from_pg_row).collect()
    }

    async fn execute_batch(&mut self, sql: &str, params: &[Vec<SqlValue>]) -> Result<u64> {
        let stmt = self.client.prepare_cached(sql).await?;
        // Statements are pipelined on the one connection.
        let client = &self.client;
        let counts = futures::future::try_join_all(
            params
                .iter()
                .map(|p| client.execute_raw(&stmt, p.iter())),
        )
        .await?;
        Ok(counts.iter().sum())
    }

    async fn simple(&mut self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }
}

//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL over deadpool-postgres
//! - [`mysql`]: MySQL/MariaDB over mysql_async
//! - [`memory`]: in-process engine for tests
//! - [`sql`]: the [`Connection`](crate::core::Connection) implementation the
//!   server drivers share
//!
//! # Adding New Databases
//!
//! 1. Create a module under `drivers/` with a [`Dialect`](crate::core::Dialect)
//!    and a [`SqlClient`](sql::SqlClient)
//! 2. Implement [`Database`] handing out `SqlConnection`s
//! 3. Add a [`DatabaseKind`] variant and route it in [`open`]

pub mod memory;
pub mod mysql;
pub mod postgres;
pub mod sql;

pub use memory::MemoryDatabase;
pub use mysql::{MysqlDatabase, MysqlDialect};
pub use postgres::{PgDatabase, PostgresDialect};

use std::sync::Arc;

use crate::config::{DatabaseConfig, DatabaseKind};
use crate::core::Database;
use crate::error::Result;

/// Connect to the database a config block describes.
pub async fn open(config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
    Ok(match config.r#type {
        DatabaseKind::Postgres => Arc::new(PgDatabase::connect(config).await?),
        DatabaseKind::Mysql => Arc::new(MysqlDatabase::connect(config).await?),
    })
}

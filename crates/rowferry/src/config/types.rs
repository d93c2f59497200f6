//! Configuration type definitions with auto-tuning based on system resources.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::estimator::DEFAULT_MUTATION_CEILING;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database rows are read from.
    pub source: DatabaseConfig,

    /// Database rows are written to and deleted from.
    pub destination: DatabaseConfig,

    /// Transfer behavior.
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.transfer = self.transfer.with_auto_tuning(&resources);
        self
    }
}

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseKind {
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    #[serde(alias = "mariadb")]
    Mysql,
}

impl DatabaseKind {
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseKind::Postgres => 5432,
            DatabaseKind::Mysql => 3306,
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::Postgres => f.write_str("postgres"),
            DatabaseKind::Mysql => f.write_str("mysql"),
        }
    }
}

/// Connection descriptor for one side of the transfer.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database engine.
    pub r#type: DatabaseKind,

    /// Database host.
    pub host: String,

    /// Database port (default: engine default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema to migrate. Defaults to `public` on PostgreSQL and the
    /// database name on MySQL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// SSL mode: disable, require, verify-ca, verify-full (default: require).
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// The engine caps column-writes per commit. Without an explicit
    /// `mutation_limit` the default ceiling applies.
    #[serde(default)]
    pub limit_mutations: bool,

    /// Maximum column-writes per commit the engine accepts. Unset and
    /// `limit_mutations` off means uncapped: the configured row batch size is
    /// used as is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_limit: Option<usize>,

    /// Connection pool size. Auto-tuned from concurrency if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("limit_mutations", &self.limit_mutations)
            .field("mutation_limit", &self.mutation_limit)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn get_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.r#type.default_port())
    }

    pub fn get_schema(&self) -> String {
        match (&self.schema, self.r#type) {
            (Some(s), _) => s.clone(),
            (None, DatabaseKind::Postgres) => "public".to_string(),
            (None, DatabaseKind::Mysql) => self.database.clone(),
        }
    }

    /// Effective mutation ceiling, if the engine has one.
    pub fn get_mutation_limit(&self) -> Option<usize> {
        self.mutation_limit
            .or(self.limit_mutations.then_some(DEFAULT_MUTATION_CEILING))
    }

    pub fn get_max_connections(&self) -> usize {
        self.max_connections.unwrap_or(8)
    }

    /// `host:port/database` for logs.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.get_port(), self.database)
    }
}

/// What to do with destination tables that already hold rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Leave non-empty destination tables untouched.
    #[default]
    SkipExisting,

    /// Delete all destination rows, then copy.
    DropAndRecreate,

    /// Fail when a destination table is not empty.
    ThrowExceptionIfExists,
}

/// Transfer behavior configuration.
/// Performance-related fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransferConfig {
    /// Existing-data policy (default: skip_existing).
    #[serde(default)]
    pub mode: TransferMode,

    /// Rows per commit for destinations without a mutation limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Logical bytes per commit for destinations with a mutation limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_byte_budget: Option<u64>,

    /// Send writes as statement batches (default: true). When off, every
    /// row is its own statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_batching: Option<bool>,

    /// Statements accumulated before a batch is flushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_statements_per_batch: Option<usize>,

    /// Tables processed at once. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tables: Option<usize>,

    /// Partition workers per table. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_partitions_per_table: Option<usize>,

    /// Tables with fewer rows use a single worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_worker_threshold: Option<i64>,

    /// Wall-clock budget per phase, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_timeout_secs: Option<u64>,

    /// Wall-clock budget per table run, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_timeout_secs: Option<u64>,

    /// Only these tables (names, case-insensitive). Empty means all.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Never these tables (names, case-insensitive).
    #[serde(default)]
    pub exclude_tables: Vec<String>,
}

impl TransferConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let cores = resources.cpu_cores;

        // Tables: half the cores, 2-16
        if self.max_concurrent_tables.is_none() {
            self.max_concurrent_tables = Some((cores / 2).clamp(2, 16));
        }

        // Partitions per table: scale with cores, 4-16
        if self.max_partitions_per_table.is_none() {
            self.max_partitions_per_table = Some(cores.clamp(4, 16));
        }

        info!(
            "Auto-tuned config: max_concurrent_tables={}, max_partitions_per_table={}",
            self.get_max_concurrent_tables(),
            self.get_max_partitions_per_table(),
        );

        self
    }

    // Accessor methods that return the effective value (with fallback defaults)

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(1_000)
    }

    pub fn get_batch_byte_budget(&self) -> u64 {
        self.batch_byte_budget.unwrap_or(1024 * 1024)
    }

    pub fn get_use_batching(&self) -> bool {
        self.use_batching.unwrap_or(true)
    }

    pub fn get_max_statements_per_batch(&self) -> usize {
        self.max_statements_per_batch.unwrap_or(1_000)
    }

    pub fn get_max_concurrent_tables(&self) -> usize {
        self.max_concurrent_tables.unwrap_or(4)
    }

    pub fn get_max_partitions_per_table(&self) -> usize {
        self.max_partitions_per_table.unwrap_or(4)
    }

    pub fn get_single_worker_threshold(&self) -> i64 {
        self.single_worker_threshold.unwrap_or(10_000)
    }

    pub fn get_phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs.unwrap_or(24 * 60 * 60))
    }

    pub fn get_table_timeout(&self) -> Duration {
        Duration::from_secs(self.table_timeout_secs.unwrap_or(24 * 60 * 60))
    }

    /// Whether a table passes the include/exclude filters.
    pub fn accepts_table(&self, name: &str) -> bool {
        let listed = |list: &[String]| list.iter().any(|t| t.eq_ignore_ascii_case(name));
        (self.include_tables.is_empty() || listed(&self.include_tables))
            && !listed(&self.exclude_tables)
    }
}

fn default_require() -> String {
    "require".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let t = TransferConfig::default();
        assert_eq!(t.mode, TransferMode::SkipExisting);
        assert_eq!(t.get_batch_byte_budget(), 1_048_576);
        assert_eq!(t.get_single_worker_threshold(), 10_000);
        assert!(t.get_use_batching());
    }

    #[test]
    fn test_auto_tuning_keeps_explicit_values() {
        let t = TransferConfig {
            max_partitions_per_table: Some(2),
            ..Default::default()
        };
        let tuned = t.with_auto_tuning(&SystemResources {
            total_memory_gb: 16.0,
            cpu_cores: 12,
        });
        assert_eq!(tuned.get_max_partitions_per_table(), 2);
        assert_eq!(tuned.get_max_concurrent_tables(), 6);
    }

    #[test]
    fn test_table_filters() {
        let t = TransferConfig {
            include_tables: vec!["Orders".into(), "items".into()],
            exclude_tables: vec!["items".into()],
            ..Default::default()
        };
        assert!(t.accepts_table("orders"));
        assert!(!t.accepts_table("items"));
        assert!(!t.accepts_table("users"));
    }

    #[test]
    fn test_schema_defaults_by_engine() {
        let yaml = "type: mysql\nhost: h\ndatabase: shop\nuser: u\n";
        let db: DatabaseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(db.get_schema(), "shop");
        assert_eq!(db.get_port(), 3306);
        assert_eq!(db.get_mutation_limit(), None);
    }

    #[test]
    fn test_capped_engine_defaults_ceiling() {
        let yaml = "type: postgres\nhost: h\ndatabase: d\nuser: u\nlimit_mutations: true\n";
        let db: DatabaseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(db.get_mutation_limit(), Some(20_000));

        let yaml = format!("{}mutation_limit: 5000\n", yaml);
        let db: DatabaseConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(db.get_mutation_limit(), Some(5_000));
    }
}

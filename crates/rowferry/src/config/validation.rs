//! Configuration validation.

use super::{Config, DatabaseConfig};
use crate::error::{MigrateError, Result};

fn validate_database(side: &str, db: &DatabaseConfig) -> Result<()> {
    if db.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", side)));
    }
    if db.database.is_empty() {
        return Err(MigrateError::Config(format!("{}.database is required", side)));
    }
    if db.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", side)));
    }
    if let Some(0) = db.mutation_limit {
        return Err(MigrateError::Config(format!(
            "{}.mutation_limit must be at least 1",
            side
        )));
    }
    if let Some(0) = db.max_connections {
        return Err(MigrateError::Config(format!(
            "{}.max_connections must be at least 1",
            side
        )));
    }
    match db.ssl_mode.to_lowercase().as_str() {
        "disable" | "require" | "verify-ca" | "verify-full" => Ok(()),
        other => Err(MigrateError::Config(format!(
            "{}.ssl_mode '{}' is invalid. Valid values: disable, require, verify-ca, verify-full",
            side, other
        ))),
    }
}

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_database("source", &config.source)?;
    validate_database("destination", &config.destination)?;

    // Cannot migrate onto the same schema
    if config.source.r#type == config.destination.r#type
        && config.source.host == config.destination.host
        && config.source.get_port() == config.destination.get_port()
        && config.source.database == config.destination.database
        && config.source.get_schema() == config.destination.get_schema()
    {
        return Err(MigrateError::Config(
            "source and destination cannot be the same schema".into(),
        ));
    }

    // Only check values that were explicitly set
    let t = &config.transfer;
    for (name, value) in [
        ("transfer.batch_size", t.batch_size),
        ("transfer.max_statements_per_batch", t.max_statements_per_batch),
        ("transfer.max_concurrent_tables", t.max_concurrent_tables),
        ("transfer.max_partitions_per_table", t.max_partitions_per_table),
    ] {
        if let Some(0) = value {
            return Err(MigrateError::Config(format!("{} must be at least 1", name)));
        }
    }
    if let Some(0) = t.batch_byte_budget {
        return Err(MigrateError::Config(
            "transfer.batch_byte_budget must be at least 1".into(),
        ));
    }
    if let Some(n) = t.single_worker_threshold {
        if n < 0 {
            return Err(MigrateError::Config(
                "transfer.single_worker_threshold cannot be negative".into(),
            ));
        }
    }
    for (name, value) in [
        ("transfer.phase_timeout_secs", t.phase_timeout_secs),
        ("transfer.table_timeout_secs", t.table_timeout_secs),
    ] {
        if let Some(0) = value {
            return Err(MigrateError::Config(format!("{} must be at least 1", name)));
        }
    }

    Ok(())
}

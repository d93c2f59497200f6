//! Error types for the transfer engine.

use std::time::Duration;

use thiserror::Error;

/// Main error type for copy and delete operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL connection or query error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL connection or query error
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Error raised by a driver that has no native error type
    #[error("{driver} error: {message}")]
    Driver { driver: String, message: String },

    /// Table metadata could not be read
    #[error("Schema lookup failed for table {table}: {message}")]
    SchemaLookup { table: String, message: String },

    /// A statement or batch failed while moving or deleting rows
    #[error("Transfer failed for table {table} (batch size {batch_size}): {source}")]
    Execution {
        table: String,
        batch_size: usize,
        #[source]
        source: Box<MigrateError>,
    },

    /// Destination table already holds rows and the mode forbids that
    #[error("Destination table {table} already contains {rows} rows")]
    ModeConflict { table: String, rows: i64 },

    /// Destination still holds rows after the delete phase emptied it
    #[error("Destination table {table} still holds {rows} rows after the delete phase")]
    StaleRows { table: String, rows: i64 },

    /// A pool did not finish within its budget
    #[error("{scope} did not finish within {after:?}")]
    Timeout { scope: String, after: Duration },

    /// Table worker lifecycle violated
    #[error("Table worker for {table} cannot move from {from} to {to}")]
    InvalidState {
        table: String,
        from: String,
        to: String,
    },

    /// A spawned worker task panicked or was aborted
    #[error("Worker task in {pool} ended abnormally: {message}")]
    WorkerPanicked { pool: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Driver error
    pub fn driver(driver: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Driver {
            driver: driver.into(),
            message: message.into(),
        }
    }

    /// Create a SchemaLookup error
    pub fn schema_lookup(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::SchemaLookup {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Wrap a statement failure with the table and batch size it happened under
    pub fn execution(table: impl Into<String>, batch_size: usize, source: MigrateError) -> Self {
        MigrateError::Execution {
            table: table.into(),
            batch_size,
            source: Box::new(source),
        }
    }

    pub fn timeout(scope: impl Into<String>, after: Duration) -> Self {
        MigrateError::Timeout {
            scope: scope.into(),
            after,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_carries_context() {
        let err = MigrateError::execution(
            "public.orders",
            2857,
            MigrateError::driver("memory", "duplicate key"),
        );
        let msg = err.to_string();
        assert!(msg.contains("public.orders"));
        assert!(msg.contains("2857"));

        let detailed = err.format_detailed();
        assert!(detailed.contains("Caused by"));
        assert!(detailed.contains("duplicate key"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 2);
        assert_eq!(MigrateError::Cancelled.exit_code(), 130);
        assert_eq!(
            MigrateError::timeout("copy phase", Duration::from_secs(1)).exit_code(),
            1
        );
    }
}

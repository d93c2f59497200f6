//! Table and column metadata.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A table identity. Two tables are the same table when schema and name match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Table {
    /// Schema name. Empty when the engine has no schema namespace.
    pub schema: String,

    /// Table name.
    pub name: String,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        if self.schema.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.schema, self.name)
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// The same logical table as found on both sides of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePair {
    pub source: Table,
    pub destination: Table,
}

impl TablePair {
    pub fn new(source: Table, destination: Table) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Display name, taken from the destination side.
    pub fn name(&self) -> String {
        self.destination.full_name()
    }
}

/// Logical type category used for size estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCategory {
    Boolean,
    Date,
    /// Integer and floating point columns of any width.
    Numeric,
    Timestamp,
    Text,
    Binary,
    Array,
    Other,
}

impl TypeCategory {
    /// Classify a driver type name (`int8`, `varchar`, `DATETIME`, `STRING(MAX)`...).
    pub fn from_type_name(type_name: &str) -> Self {
        let lowered = type_name.trim().to_lowercase();
        if lowered.starts_with('_') || lowered.ends_with("[]") || lowered.starts_with("array") {
            return TypeCategory::Array;
        }
        let base = lowered
            .split(|c: char| c == '(' || c == ' ')
            .next()
            .unwrap_or_default();

        match base {
            "bool" | "boolean" | "bit" => TypeCategory::Boolean,
            "date" => TypeCategory::Date,
            "int2" | "int4" | "int8" | "int64" | "int" | "integer" | "smallint" | "bigint"
            | "tinyint" | "mediumint" | "serial" | "bigserial" | "float4" | "float8"
            | "float64" | "float" | "real" | "double" => TypeCategory::Numeric,
            "timestamp" | "timestamptz" | "datetime" | "datetime2" | "datetimeoffset" => {
                TypeCategory::Timestamp
            }
            "varchar" | "character" | "char" | "text" | "string" | "nvarchar" | "nchar"
            | "bpchar" | "tinytext" | "mediumtext" | "longtext" | "enum" => TypeCategory::Text,
            "bytea" | "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob"
            | "longblob" | "bytes" => TypeCategory::Binary,
            _ => TypeCategory::Other,
        }
    }
}

/// Column metadata as reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,

    /// Driver type name.
    pub data_type: String,

    /// Declared maximum length for variable-length types, 0 when unbounded or not applicable.
    pub max_length: i64,

    /// Whether the column is nullable.
    pub is_nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: 0,
            is_nullable: true,
        }
    }

    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn category(&self) -> TypeCategory {
        TypeCategory::from_type_name(&self.data_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        assert_eq!(Table::new("public", "users").full_name(), "public.users");
        assert_eq!(Table::new("", "users").full_name(), "users");
    }

    #[test]
    fn test_type_categories() {
        assert_eq!(TypeCategory::from_type_name("bool"), TypeCategory::Boolean);
        assert_eq!(TypeCategory::from_type_name("INT64"), TypeCategory::Numeric);
        assert_eq!(
            TypeCategory::from_type_name("double precision"),
            TypeCategory::Numeric
        );
        assert_eq!(
            TypeCategory::from_type_name("character varying"),
            TypeCategory::Text
        );
        assert_eq!(TypeCategory::from_type_name("STRING(MAX)"), TypeCategory::Text);
        assert_eq!(TypeCategory::from_type_name("timestamptz"), TypeCategory::Timestamp);
        assert_eq!(TypeCategory::from_type_name("bytea"), TypeCategory::Binary);
        assert_eq!(TypeCategory::from_type_name("_int4"), TypeCategory::Array);
        assert_eq!(TypeCategory::from_type_name("jsonb"), TypeCategory::Other);
    }
}

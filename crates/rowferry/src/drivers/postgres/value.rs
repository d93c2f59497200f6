//! Conversion between [`SqlValue`] and PostgreSQL wire values.

use std::error::Error;
use std::str::FromStr;

use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use uuid::Uuid;

use crate::core::{Row, SqlNullType, SqlValue};
use crate::error::Result;

type BoxError = Box<dyn Error + Sync + Send>;

fn int_to_sql(v: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(v)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(v)?.to_sql(ty, out),
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        Type::FLOAT8 => (v as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(v).to_sql(ty, out),
        Type::BOOL => (v != 0).to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
        _ => v.to_sql(ty, out),
    }
}

fn float_to_sql(v: f64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        Type::NUMERIC => Decimal::from_f64(v)
            .ok_or("float out of numeric range")?
            .to_sql(ty, out),
        _ => v.to_sql(ty, out),
    }
}

fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(s.trim().parse()?, ty, out),
        Type::FLOAT4 | Type::FLOAT8 => float_to_sql(s.trim().parse()?, ty, out),
        Type::NUMERIC => Decimal::from_str(s.trim())?.to_sql(ty, out),
        Type::UUID => Uuid::parse_str(s.trim())?.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out),
        Type::BOOL => matches!(s.trim(), "1" | "t" | "true" | "TRUE" | "y").to_sql(ty, out),
        // Text, varchar, name, enums and other text-encoded types
        _ => {
            out.extend_from_slice(s.as_bytes());
            Ok(IsNull::No)
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            SqlValue::Null(_) => Ok(IsNull::Yes),
            SqlValue::Bool(v) => match *ty {
                Type::BOOL => v.to_sql(ty, out),
                _ => int_to_sql(*v as i64, ty, out),
            },
            SqlValue::I16(v) => int_to_sql(*v as i64, ty, out),
            SqlValue::I32(v) => int_to_sql(*v as i64, ty, out),
            SqlValue::I64(v) => int_to_sql(*v, ty, out),
            SqlValue::F32(v) => float_to_sql(*v as f64, ty, out),
            SqlValue::F64(v) => float_to_sql(*v, ty, out),
            SqlValue::Text(s) => text_to_sql(s, ty, out),
            SqlValue::Bytes(b) => match *ty {
                Type::BYTEA => b.as_slice().to_sql(ty, out),
                _ => text_to_sql(&String::from_utf8_lossy(b), ty, out),
            },
            SqlValue::Uuid(u) => match *ty {
                Type::UUID => u.to_sql(ty, out),
                _ => text_to_sql(&u.to_string(), ty, out),
            },
            SqlValue::Decimal(d) => match *ty {
                Type::NUMERIC => d.to_sql(ty, out),
                _ => text_to_sql(&d.to_string(), ty, out),
            },
            SqlValue::DateTime(dt) => match *ty {
                Type::TIMESTAMPTZ => Utc.from_utc_datetime(dt).to_sql(ty, out),
                _ => dt.to_sql(ty, out),
            },
            SqlValue::DateTimeOffset(dt) => match *ty {
                Type::TIMESTAMP => dt.naive_utc().to_sql(ty, out),
                _ => dt.to_sql(ty, out),
            },
            SqlValue::Date(d) => d.to_sql(ty, out),
            SqlValue::Time(t) => t.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

macro_rules! column {
    ($row:expr, $idx:expr, $t:ty, $wrap:expr, $null:expr) => {
        $row.try_get::<_, Option<$t>>($idx)?
            .map($wrap)
            .unwrap_or(SqlValue::Null($null))
    };
}

/// Convert one result row, choosing the Rust type from each column's wire type.
pub(crate) fn from_pg_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => column!(row, idx, bool, SqlValue::Bool, SqlNullType::Bool),
            Type::INT2 => column!(row, idx, i16, SqlValue::I16, SqlNullType::I16),
            Type::INT4 => column!(row, idx, i32, SqlValue::I32, SqlNullType::I32),
            Type::INT8 => column!(row, idx, i64, SqlValue::I64, SqlNullType::I64),
            Type::FLOAT4 => column!(row, idx, f32, SqlValue::F32, SqlNullType::F32),
            Type::FLOAT8 => column!(row, idx, f64, SqlValue::F64, SqlNullType::F64),
            Type::NUMERIC => column!(row, idx, Decimal, SqlValue::Decimal, SqlNullType::Decimal),
            Type::UUID => column!(row, idx, Uuid, SqlValue::Uuid, SqlNullType::Uuid),
            Type::BYTEA => column!(row, idx, Vec<u8>, SqlValue::Bytes, SqlNullType::Bytes),
            Type::DATE => column!(row, idx, NaiveDate, SqlValue::Date, SqlNullType::Date),
            Type::TIME => column!(row, idx, NaiveTime, SqlValue::Time, SqlNullType::Time),
            Type::TIMESTAMP => {
                column!(row, idx, NaiveDateTime, SqlValue::DateTime, SqlNullType::DateTime)
            }
            Type::TIMESTAMPTZ => column!(
                row,
                idx,
                DateTime<FixedOffset>,
                SqlValue::DateTimeOffset,
                SqlNullType::DateTimeOffset
            ),
            Type::JSON | Type::JSONB => column!(
                row,
                idx,
                serde_json::Value,
                |v: serde_json::Value| SqlValue::Text(v.to_string()),
                SqlNullType::String
            ),
            _ => column!(row, idx, String, SqlValue::Text, SqlNullType::String),
        };
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &SqlValue, ty: &Type) -> (IsNull, Vec<u8>) {
        let mut out = BytesMut::new();
        let is_null = value.to_sql(ty, &mut out).unwrap();
        (is_null, out.to_vec())
    }

    #[test]
    fn test_null_encodes_as_null() {
        let (is_null, bytes) = encode(&SqlValue::Null(SqlNullType::I64), &Type::INT8);
        assert!(matches!(is_null, IsNull::Yes));
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_integers_narrow_to_column_width() {
        assert_eq!(encode(&SqlValue::I64(7), &Type::INT4).1, 7i32.to_be_bytes());
        assert_eq!(encode(&SqlValue::I16(7), &Type::INT8).1, 7i64.to_be_bytes());
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let mut out = BytesMut::new();
        assert!(SqlValue::I64(1 << 40).to_sql(&Type::INT4, &mut out).is_err());
    }

    #[test]
    fn test_text_is_raw_utf8() {
        assert_eq!(encode(&SqlValue::Text("héllo".into()), &Type::VARCHAR).1, "héllo".as_bytes());
        assert_eq!(encode(&SqlValue::Text("42".into()), &Type::INT8).1, 42i64.to_be_bytes());
    }
}

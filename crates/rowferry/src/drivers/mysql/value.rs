//! Conversion between [`SqlValue`] and `mysql_async` values.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use mysql_async::consts::ColumnType;
use mysql_async::{Column, Value};
use rust_decimal::Decimal;

use crate::core::{SqlNullType, SqlValue};

/// Character set id MySQL reports for binary columns.
const BINARY_CHARSET: u16 = 63;

pub(crate) fn to_mysql(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null(_) => Value::NULL,
        SqlValue::Bool(b) => Value::from(*b),
        SqlValue::I16(i) => Value::from(*i),
        SqlValue::I32(i) => Value::from(*i),
        SqlValue::I64(i) => Value::from(*i),
        SqlValue::F32(f) => Value::from(*f),
        SqlValue::F64(f) => Value::from(*f),
        SqlValue::Text(s) => Value::from(s.as_str()),
        SqlValue::Bytes(b) => Value::from(b.as_slice()),
        SqlValue::Uuid(u) => Value::from(u.to_string()),
        SqlValue::Decimal(d) => Value::from(d.to_string()),
        SqlValue::DateTime(dt) => Value::from(*dt),
        SqlValue::DateTimeOffset(dto) => Value::from(dto.naive_utc()),
        SqlValue::Date(d) => Value::from(*d),
        SqlValue::Time(t) => Value::from(*t),
    }
}

fn null_type(column: &Column) -> SqlNullType {
    use ColumnType::*;
    match column.column_type() {
        MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT => SqlNullType::I16,
        MYSQL_TYPE_LONG | MYSQL_TYPE_INT24 => SqlNullType::I32,
        MYSQL_TYPE_LONGLONG | MYSQL_TYPE_YEAR => SqlNullType::I64,
        MYSQL_TYPE_FLOAT => SqlNullType::F32,
        MYSQL_TYPE_DOUBLE => SqlNullType::F64,
        MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => SqlNullType::Decimal,
        MYSQL_TYPE_DATE => SqlNullType::Date,
        MYSQL_TYPE_TIME => SqlNullType::Time,
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_TIMESTAMP => SqlNullType::DateTime,
        _ if column.character_set() == BINARY_CHARSET => SqlNullType::Bytes,
        _ => SqlNullType::String,
    }
}

/// Text-encoded value, typed by its column.
fn from_bytes(column: &Column, bytes: Vec<u8>) -> SqlValue {
    use ColumnType::*;
    let parsed = std::str::from_utf8(&bytes).ok().and_then(|s| match column.column_type() {
        MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_LONG | MYSQL_TYPE_INT24
        | MYSQL_TYPE_LONGLONG | MYSQL_TYPE_YEAR => s.parse().ok().map(SqlValue::I64),
        MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => s.parse().ok().map(SqlValue::F64),
        MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => {
            Decimal::from_str(s).ok().map(SqlValue::Decimal)
        }
        _ if column.character_set() == BINARY_CHARSET => None,
        _ => Some(SqlValue::Text(s.to_string())),
    });
    parsed.unwrap_or(SqlValue::Bytes(bytes))
}

pub(crate) fn from_mysql(column: &Column, value: Value) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null(null_type(column)),
        Value::Int(i) => SqlValue::I64(i),
        Value::UInt(u) => match i64::try_from(u) {
            Ok(i) => SqlValue::I64(i),
            Err(_) => SqlValue::Decimal(Decimal::from(u)),
        },
        Value::Float(f) => SqlValue::F32(f),
        Value::Double(f) => SqlValue::F64(f),
        Value::Bytes(b) => from_bytes(column, b),
        Value::Date(y, m, d, h, mi, s, us) => {
            let date = NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32);
            let time = NaiveTime::from_hms_micro_opt(h as u32, mi as u32, s as u32, us);
            match (date, time) {
                (Some(date), _) if column.column_type() == ColumnType::MYSQL_TYPE_DATE => {
                    SqlValue::Date(date)
                }
                (Some(date), Some(time)) => SqlValue::DateTime(date.and_time(time)),
                // Zero dates have no chrono representation
                _ => SqlValue::Null(null_type(column)),
            }
        }
        Value::Time(false, 0, h, mi, s, us) => {
            match NaiveTime::from_hms_micro_opt(h as u32, mi as u32, s as u32, us) {
                Some(t) => SqlValue::Time(t),
                None => SqlValue::Null(SqlNullType::Time),
            }
        }
        // Intervals outside a single day stay textual
        Value::Time(neg, days, h, mi, s, us) => SqlValue::Text(format!(
            "{}{}:{:02}:{:02}.{:06}",
            if neg { "-" } else { "" },
            days * 24 + h as u32,
            mi,
            s,
            us
        )),
    }
}
